//! Parsers for `svn --xml` output.

use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::SvnError;

/// The parts of `svn info --xml` the adapters need.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SvnInfo {
    pub url: String,
    pub root_url: String,
    /// `<entry revision=..>`
    pub revision: i64,
    /// `<commit revision=..>`, the last revision that touched the node.
    pub last_changed_rev: i64,
}

/// One `<entry>` of `svn status --xml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SvnStatusEntry {
    pub path: String,
    /// `wc-status/@item`: added, deleted, modified, conflicted, ...
    pub item: String,
    /// Scheduled with history (`A  +`).
    pub copied: bool,
}

pub fn parse_svn_info(xml: &str) -> Result<SvnInfo, SvnError> {
    debug!(bytes = xml.len(), "parsing svn info");
    let missing = |what: &str| SvnError::XmlParseError(format!("svn info has no {}", what));

    let (entry_attrs, entry_body) = element(xml, "entry")?.ok_or_else(|| missing("<entry>"))?;
    let revision = attribute(&entry_attrs, "revision")?
        .and_then(|r| r.parse::<i64>().ok())
        .ok_or_else(|| missing("entry revision"))?;
    let url = element(&entry_body, "url")?
        .map(|(_, text)| unescape(text.trim()))
        .ok_or_else(|| missing("<url>"))?;
    let root_url = element(&entry_body, "root")?
        .map(|(_, text)| unescape(text.trim()))
        .ok_or_else(|| missing("<root>"))?;
    let last_changed_rev = match element(&entry_body, "commit")? {
        Some((attrs, _)) => attribute(&attrs, "revision")?.and_then(|r| r.parse().ok()),
        None => None,
    }
    .unwrap_or(revision);

    Ok(SvnInfo {
        url,
        root_url,
        revision,
        last_changed_rev,
    })
}

pub fn parse_svn_status(xml: &str) -> Result<Vec<SvnStatusEntry>, SvnError> {
    debug!(bytes = xml.len(), "parsing svn status");
    if !xml.contains("<status") {
        return Err(SvnError::XmlParseError("no <status> element".into()));
    }
    let entry_re = element_regex("entry")?;
    let mut entries = Vec::new();
    for caps in entry_re.captures_iter(xml) {
        let (attrs, body) = split(&caps);
        let Some(path) = attribute(&attrs, "path")? else {
            warn!("svn status entry without a path");
            continue;
        };
        let wc_attrs = opening_tag(&body, "wc-status")?.unwrap_or_default();
        entries.push(SvnStatusEntry {
            path: unescape(&path),
            item: attribute(&wc_attrs, "item")?.unwrap_or_default(),
            copied: attribute(&wc_attrs, "copied")?.as_deref() == Some("true"),
        });
    }
    debug!(count = entries.len(), "parsed svn status");
    Ok(entries)
}

fn compile(pattern: &str) -> Result<Regex, SvnError> {
    Regex::new(pattern).map_err(|e| SvnError::XmlParseError(e.to_string()))
}

// `<url>` must not match `<urlencoded>`, hence the whitespace-or-'>' guard.
fn element_regex(tag: &str) -> Result<Regex, SvnError> {
    compile(&format!(r"(?s)<{tag}(\s[^>]*)?>(.*?)</{tag}>", tag = tag))
}

fn split(caps: &Captures<'_>) -> (String, String) {
    let text = |i: usize| caps.get(i).map_or("", |m| m.as_str()).to_string();
    (text(1), text(2))
}

/// First `<tag ...>body</tag>` in `xml`, as (attributes, body).
fn element(xml: &str, tag: &str) -> Result<Option<(String, String)>, SvnError> {
    Ok(element_regex(tag)?.captures(xml).map(|c| split(&c)))
}

/// Attributes of the first `<tag ...>` or `<tag .../>`.
fn opening_tag(xml: &str, tag: &str) -> Result<Option<String>, SvnError> {
    let re = compile(&format!(r"<{}(\s[^>]*?)?/?>", tag))?;
    Ok(re
        .captures(xml)
        .map(|c| c.get(1).map_or("", |m| m.as_str()).to_string()))
}

fn attribute(attrs: &str, name: &str) -> Result<Option<String>, SvnError> {
    let re = compile(&format!(
        r#"(?:^|\s){}\s*=\s*(?:"([^"]*)"|'([^']*)')"#,
        name
    ))?;
    Ok(re
        .captures(attrs)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string()))
}

fn unescape(text: &str) -> String {
    [
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&apos;", "'"),
        ("&amp;", "&"),
    ]
    .iter()
    .fold(text.to_string(), |acc, (entity, ch)| acc.replace(entity, ch))
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<info>
<entry
   kind="dir"
   path="trunk"
   revision="1234">
<url>file:///srv/repo/trunk</url>
<relative-url>^/trunk</relative-url>
<repository>
<root>file:///srv/repo</root>
<uuid>a1b2c3d4</uuid>
</repository>
<commit
   revision="1200">
<author>alice</author>
</commit>
</entry>
</info>"#;

    #[test]
    fn test_info_reads_both_revisions() {
        let info = parse_svn_info(INFO).unwrap();
        assert_eq!(info.revision, 1234);
        assert_eq!(info.last_changed_rev, 1200);
        assert_eq!(info.url, "file:///srv/repo/trunk");
        assert_eq!(info.root_url, "file:///srv/repo");
    }

    #[test]
    fn test_info_without_commit_uses_entry_revision() {
        let xml = r#"<info><entry revision="7"><url>u</url><repository><root>r</root></repository></entry></info>"#;
        assert_eq!(parse_svn_info(xml).unwrap().last_changed_rev, 7);
    }

    #[test]
    fn test_info_missing_url_is_an_error() {
        let err = parse_svn_info(r#"<info><entry revision="1"></entry></info>"#).unwrap_err();
        assert!(matches!(err, SvnError::XmlParseError(ref m) if m.contains("<url>")));
    }

    #[test]
    fn test_status_entries() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<status>
<target path="/wc/vendor/parent">
<entry path="/wc/vendor/parent/copied_file">
<wc-status props="none" copied="true" item="added"></wc-status>
</entry>
<entry path="/wc/vendor/parent/conflicting_file">
<wc-status props="none" item="modified" revision="2">
<commit revision="2"><author>bob</author></commit>
</wc-status>
</entry>
<entry path="/wc/vendor/parent/R&amp;D">
<wc-status props="none" item="unversioned"></wc-status>
</entry>
</target>
</status>"#;
        let entries = parse_svn_status(xml).unwrap();
        assert_eq!(
            entries,
            vec![
                SvnStatusEntry {
                    path: "/wc/vendor/parent/copied_file".into(),
                    item: "added".into(),
                    copied: true,
                },
                SvnStatusEntry {
                    path: "/wc/vendor/parent/conflicting_file".into(),
                    item: "modified".into(),
                    copied: false,
                },
                SvnStatusEntry {
                    path: "/wc/vendor/parent/R&D".into(),
                    item: "unversioned".into(),
                    copied: false,
                },
            ]
        );
    }

    #[test]
    fn test_status_rejects_non_status_output() {
        assert!(parse_svn_status("<info/>").is_err());
        assert!(parse_svn_status("<status>\n</status>").unwrap().is_empty());
    }

    #[test]
    fn test_attribute_name_must_stand_alone() {
        let attrs = r#" copyfrom-path="/a" path='/b'"#;
        assert_eq!(attribute(attrs, "path").unwrap().as_deref(), Some("/b"));
        assert_eq!(attribute(attrs, "missing").unwrap(), None);
    }
}
