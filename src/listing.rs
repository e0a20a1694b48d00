//! HTML rendering of a directory listing.
//!
//! Rendering is pure: it only sees the relative path and the entries already
//! read by [`crate::storage::Storage::list_dir`]. maud escapes every
//! interpolated name; query arguments are percent-encoded.

use maud::{DOCTYPE, Markup, PreEscaped, html};

use crate::config::UPLOAD_FIELD_NAME;
use crate::storage::{EntryKind, FileEntry, RelativePath};

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

const STYLES: &str = r#"
*{box-sizing:border-box}
body{margin:0;font-family:ui-sans-serif,system-ui,-apple-system,"Segoe UI",Roboto,Arial,sans-serif;background:#0f172a;color:#e2e8f0}
a{color:inherit}
.wrap{max-width:960px;margin:0 auto;padding:16px}
header{display:flex;flex-wrap:wrap;justify-content:space-between;align-items:flex-start;gap:12px;margin-bottom:16px}
h1{margin:0 0 8px;font-size:18px}
.crumbs{display:flex;flex-wrap:wrap;gap:6px;align-items:center;font-size:13px}
.crumbs a,.crumbs span.current{padding:4px 10px;border:1px solid #334155;border-radius:999px;text-decoration:none;color:#94a3b8}
.crumbs .sep{color:#475569}
.actions{display:flex;gap:8px}
.btn{display:inline-block;padding:8px 12px;border:1px solid #334155;border-radius:10px;background:#1e293b;text-decoration:none;font-size:13px;cursor:pointer;color:#e2e8f0}
.btn.primary{background:#6366f1;border-color:#6366f1;color:#fff}
.grid{display:grid;grid-template-columns:1.3fr .7fr;gap:16px;align-items:start}
@media (max-width:800px){.grid{grid-template-columns:1fr}}
.card{border:1px solid #334155;border-radius:14px;background:#111c33;padding:14px}
.card h2{margin:0 0 12px;font-size:14px}
.filter{width:100%;padding:8px 10px;margin-bottom:12px;border:1px solid #334155;border-radius:10px;background:#0b1222;color:#e2e8f0}
.list{display:flex;flex-direction:column;gap:8px}
.item{display:flex;justify-content:space-between;align-items:center;gap:10px;padding:8px 10px;border:1px solid #1e293b;border-radius:10px}
.name{font-weight:600;font-size:14px;overflow:hidden;text-overflow:ellipsis;white-space:nowrap}
.meta{font-size:12px;color:#94a3b8}
.empty{padding:10px;color:#94a3b8;font-size:13px}
form.drop{display:flex;flex-direction:column;gap:10px;padding:12px;border:1px dashed #475569;border-radius:12px}
form.drop.over{border-color:#6366f1;background:#1e1b4b}
"#;

const SCRIPT: &str = r#"
(function () {
  var filter = document.getElementById('filter');
  var items = Array.prototype.slice.call(document.querySelectorAll('#list .item'));
  var noMatch = document.getElementById('no-match');
  function applyFilter() {
    var term = filter.value.trim().toLowerCase();
    var shown = 0;
    items.forEach(function (item) {
      var name = (item.getAttribute('data-name') || '').toLowerCase();
      var visible = !term || name.indexOf(term) !== -1;
      item.style.display = visible ? '' : 'none';
      if (visible) { shown += 1; }
    });
    noMatch.style.display = items.length && !shown ? '' : 'none';
  }
  filter.addEventListener('input', applyFilter);
  applyFilter();

  var form = document.getElementById('upload');
  var input = document.getElementById('file');
  var status = document.getElementById('status');
  ['dragenter', 'dragover'].forEach(function (name) {
    form.addEventListener(name, function (event) {
      event.preventDefault();
      form.classList.add('over');
    });
  });
  ['dragleave', 'drop'].forEach(function (name) {
    form.addEventListener(name, function (event) {
      event.preventDefault();
      form.classList.remove('over');
    });
  });
  form.addEventListener('drop', function (event) {
    if (event.dataTransfer && event.dataTransfer.files.length) {
      input.files = event.dataTransfer.files;
    }
  });
  form.addEventListener('submit', function () {
    status.textContent = 'Uploading, please wait…';
  });
})();
"#;

/// Formats a byte count with binary steps: whole bytes, otherwise at most two
/// decimals with trailing zeros dropped.
pub fn human_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        return format!("{bytes} B");
    }
    let formatted = format!("{value:.2}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}

#[derive(Debug, PartialEq, Eq)]
pub struct Crumb {
    pub label: String,
    pub path: RelativePath,
}

/// One crumb per segment, each pointing at the accumulated prefix.
pub fn breadcrumbs(current: &RelativePath) -> Vec<Crumb> {
    let mut crumbs = Vec::new();
    let mut prefix = RelativePath::root();
    for segment in current.segments() {
        prefix = prefix.join(segment);
        crumbs.push(Crumb {
            label: segment.to_string(),
            path: prefix.clone(),
        });
    }
    crumbs
}

pub fn browse_href(path: &RelativePath) -> String {
    format!("/?path={}", urlencoding::encode(path.as_str()))
}

fn download_href(path: &RelativePath) -> String {
    format!("/download?path={}", urlencoding::encode(path.as_str()))
}

fn upload_href(path: &RelativePath) -> String {
    format!("/upload?path={}", urlencoding::encode(path.as_str()))
}

pub fn render_directory(current: &RelativePath, entries: &[FileEntry]) -> Markup {
    let crumbs = breadcrumbs(current);
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { "axo-share /" (current.as_str()) }
                style { (PreEscaped(STYLES)) }
            }
            body {
                div class="wrap" {
                    header {
                        div {
                            h1 { "axo-share" }
                            nav class="crumbs" {
                                a href="/?path=" { "Home" }
                                @for crumb in &crumbs {
                                    span class="sep" { "/" }
                                    a href=(browse_href(&crumb.path)) { (crumb.label) }
                                }
                            }
                        }
                        div class="actions" {
                            a class="btn" href=(browse_href(&current.parent())) title="Parent folder" { "Up" }
                            a class="btn" href=(browse_href(current)) title="Reload" { "Refresh" }
                        }
                    }
                    div class="grid" {
                        section class="card" {
                            h2 { "Files & folders" }
                            input id="filter" class="filter" type="search" placeholder="Filter by name" autocomplete="off";
                            div id="list" class="list" {
                                @if entries.is_empty() {
                                    div class="empty" { "This folder is empty." }
                                }
                                div id="no-match" class="empty" style="display:none" { "No matches." }
                                @for entry in entries {
                                    (render_entry(current, entry))
                                }
                            }
                        }
                        section class="card" {
                            h2 { "Upload" }
                            form id="upload" class="drop" method="post" enctype="multipart/form-data" action=(upload_href(current)) {
                                div class="meta" { "Pick a file or drop it here. It is stored in this folder." }
                                input id="file" type="file" name=(UPLOAD_FIELD_NAME) required;
                                div class="actions" {
                                    button class="btn primary" type="submit" { "Upload" }
                                }
                                div id="status" class="meta" {}
                            }
                        }
                    }
                }
                script { (PreEscaped(SCRIPT)) }
            }
        }
    }
}

fn render_entry(current: &RelativePath, entry: &FileEntry) -> Markup {
    let path = current.join(&entry.name);
    match &entry.kind {
        EntryKind::Directory => html! {
            div class="item" data-name=(entry.name) data-kind="dir" {
                div {
                    div class="name" { "📁 " (entry.name) }
                    div class="meta" { "Folder" }
                }
                a class="btn" href=(browse_href(&path)) { "Open" }
            }
        },
        EntryKind::File { size, modified } => html! {
            div class="item" data-name=(entry.name) data-kind="file" {
                div {
                    div class="name" { "📄 " (entry.name) }
                    div class="meta" {
                        (human_bytes(*size))
                        @if let Some(modified) = modified {
                            " · " (modified.format("%Y-%m-%d %H:%M").to_string())
                        }
                    }
                }
                a class="btn primary" href=(download_href(&path)) { "Download" }
            }
        },
    }
}
