use std::sync::LazyLock;

use regex::Regex;
use smallvec::SmallVec;

pub type Links = SmallVec<[String; 2]>;

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)https?://[^\s]*?(?:terabox|teraboxapp|teraboxshare|nephobox|1024tera|1024terabox|freeterabox|terasharefile|terasharelink|mirrobox|momerybox|teraboxlink|teraboxurl)\.[^\s]+",
    )
    .expect("invalid link regex")
});

/// Extract every TeraBox share link from `text`, in order of appearance.
///
/// Duplicates are kept: each occurrence becomes its own job.
pub fn extract_links(text: &str) -> Links {
    LINK_RE
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', '!', '?']).to_string())
        .collect()
}
