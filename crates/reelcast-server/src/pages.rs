//! HTML for the listing and watch pages.

use std::fmt::Write as _;
use std::time::SystemTime;

use chrono::{DateTime, Local};

use crate::registry::{content_type_for, VideoFile};

const STYLE: &str = "body{font-family:sans-serif;margin:2rem;background:#111;color:#eee}\
a{color:#9cf;text-decoration:none}\
.grid{display:grid;grid-template-columns:repeat(auto-fill,minmax(240px,1fr));gap:1rem}\
.card{background:#222;border-radius:6px;overflow:hidden}\
.card img{width:100%;aspect-ratio:16/9;object-fit:cover;background:#000}\
.card div{padding:.5rem}\
.meta{color:#999;font-size:.85em}\
video{width:100%;max-width:1280px;background:#000}";

/// Escape text for use in HTML content and attribute values.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Format a byte count with a binary unit, e.g. `1.5 MiB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn format_modified(modified: SystemTime) -> String {
    DateTime::<Local>::from(modified)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n{body}</body>\n</html>\n",
        escape_html(title)
    )
}

/// Index page listing every video with its thumbnail.
pub fn render_listing(videos: &[VideoFile]) -> String {
    let mut body = String::from("<h1>Videos</h1>\n");
    if videos.is_empty() {
        body.push_str("<p>No videos found.</p>\n");
        return page("Videos", &body);
    }

    let _ = writeln!(body, "<p class=\"meta\">{} videos</p>", videos.len());
    body.push_str("<div class=\"grid\">\n");
    for video in videos {
        let title = escape_html(&video.display_name);
        let _ = writeln!(
            body,
            "<a class=\"card\" href=\"/watch/{id}\"><img src=\"/thumbnails/{id}\" alt=\"{title}\" loading=\"lazy\">\
             <div>{title}<br><span class=\"meta\">{size} &middot; {modified}</span></div></a>",
            id = video.id,
            size = format_size(video.size),
            modified = format_modified(video.modified),
        );
    }
    body.push_str("</div>\n");
    page("Videos", &body)
}

/// Player page for one video.
pub fn render_watch(video: &VideoFile) -> String {
    let title = escape_html(&video.display_name);
    let body = format!(
        "<p><a href=\"/\">&larr; All videos</a></p>\n<h1>{title}</h1>\n\
         <video controls autoplay preload=\"metadata\" poster=\"/thumbnails/{id}\">\
         <source src=\"/videos/{id}\" type=\"{mime}\"></video>\n\
         <p class=\"meta\">{name} &middot; {size} &middot; {modified}</p>\n",
        id = video.id,
        mime = content_type_for(&video.path),
        name = escape_html(&video.name),
        size = format_size(video.size),
        modified = format_modified(video.modified),
    );
    page(&video.display_name, &body)
}
