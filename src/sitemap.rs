//! `robots.txt` and `sitemap.xml` for the recovered site.
//!
//! Every page in the File Index becomes a `<url>` under `https://<host>/`.
//! Index pages map to their directory URL (`blog/index.html` →
//! `https://host/blog/`), everything else keeps its file name.

use crate::config::SitemapConfig;
use crate::index::{self, FileIndex};
use crate::paths;
use chrono::NaiveDate;
use quick_xml::escape::escape;
use std::fs;
use std::io;
use std::path::Path;
use tracing::info;

const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SitemapReport {
    pub urls: usize,
}

/// Absolute URL of a page of `index`.
pub fn page_url(index: &FileIndex, host: &str, rel: &str) -> String {
    if index.is_index_page(rel) {
        match paths::parent_dir(rel) {
            "" => format!("https://{host}/"),
            dir => format!("https://{host}/{}/", paths::encode_url_path(dir)),
        }
    } else {
        format!("https://{host}/{}", paths::encode_url_path(rel))
    }
}

/// Page URLs in index order.
pub fn page_urls(index: &FileIndex, host: &str) -> Vec<String> {
    index
        .iter()
        .filter(|rel| index::is_page(rel))
        .map(|rel| page_url(index, host, rel))
        .collect()
}

pub fn robots_txt(host: &str) -> String {
    format!("User-agent: *\nAllow: /\nSitemap: https://{host}/sitemap.xml\n")
}

pub fn sitemap_xml(urls: &[String], lastmod: NaiveDate, config: &SitemapConfig) -> String {
    let lastmod = lastmod.format("%Y-%m-%d").to_string();
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&format!("<urlset xmlns=\"{SITEMAP_NS}\">\n"));
    for url in urls {
        xml.push_str("    <url>\n");
        xml.push_str(&format!("        <loc>{}</loc>\n", escape(url.as_str())));
        xml.push_str(&format!("        <lastmod>{lastmod}</lastmod>\n"));
        xml.push_str(&format!(
            "        <changefreq>{}</changefreq>\n",
            config.changefreq
        ));
        xml.push_str(&format!("        <priority>{}</priority>\n", config.priority));
        xml.push_str("    </url>\n");
    }
    xml.push_str("</urlset>\n");
    xml
}

/// Write `robots.txt` and `sitemap.xml` into `root`.
pub fn write_sitemap(
    root: &Path,
    index: &FileIndex,
    host: &str,
    config: &SitemapConfig,
    today: NaiveDate,
) -> io::Result<SitemapReport> {
    let urls = page_urls(index, host);
    fs::write(root.join("robots.txt"), robots_txt(host))?;
    fs::write(root.join("sitemap.xml"), sitemap_xml(&urls, today, config))?;
    info!(urls = urls.len(), "sitemap written");
    Ok(SitemapReport { urls: urls.len() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{read, write_tree};
    use tempfile::TempDir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    #[test]
    fn index_pages_map_to_directories() {
        let index = FileIndex::from_paths([
            "index.html",
            "blog/Index.htm",
            "blog/post.html",
            "my blog/a b.html",
        ]);
        let url = |rel| page_url(&index, "site.example", rel);
        assert_eq!(url("index.html"), "https://site.example/");
        assert_eq!(url("blog/Index.htm"), "https://site.example/blog/");
        assert_eq!(url("blog/post.html"), "https://site.example/blog/post.html");
        assert_eq!(url("my blog/a b.html"), "https://site.example/my%20blog/a%20b.html");
    }

    #[test]
    fn robots_points_at_sitemap() {
        assert_eq!(
            robots_txt("site.example"),
            "User-agent: *\nAllow: /\nSitemap: https://site.example/sitemap.xml\n"
        );
    }

    #[test]
    fn sitemap_document_layout() {
        let xml = sitemap_xml(
            &["https://site.example/?a=1&b=2".to_string()],
            day(),
            &SitemapConfig::default(),
        );
        assert_eq!(
            xml,
            concat!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
                "<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
                "    <url>\n",
                "        <loc>https://site.example/?a=1&amp;b=2</loc>\n",
                "        <lastmod>2024-03-09</lastmod>\n",
                "        <changefreq>weekly</changefreq>\n",
                "        <priority>0.8</priority>\n",
                "    </url>\n",
                "</urlset>\n"
            )
        );
    }

    #[test]
    fn writes_both_files_for_pages_only() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("index.html", ""),
                ("about/index.html", ""),
                ("feed.xml", ""),
                ("assets/css/a.css", ""),
            ],
        );
        let index = FileIndex::build(tmp.path());
        let report =
            write_sitemap(tmp.path(), &index, "site.example", &SitemapConfig::default(), day()).unwrap();

        assert_eq!(report.urls, 2);
        let xml = read(tmp.path(), "sitemap.xml");
        assert!(xml.contains("<loc>https://site.example/about/</loc>"));
        assert!(xml.contains("<loc>https://site.example/</loc>"));
        assert!(!xml.contains("feed.xml"));
        assert!(read(tmp.path(), "robots.txt").contains("Sitemap: https://site.example/sitemap.xml"));
    }
}
