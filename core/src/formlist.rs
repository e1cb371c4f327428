//! Form list and manifest parsing.
//!
//! # Design
//! Both documents are a root element holding a flat run of entries, each
//! entry a handful of text-only child elements. [`scan`] reduces a document
//! to that shape in one pass over `quick-xml` events, ignoring namespaces
//! and anything nested deeper. The public parsers then validate entries one
//! at a time: an entry missing a required element becomes an [`EntryError`]
//! next to the usable entries instead of failing the whole document. Only a
//! document that is not well-formed, or has the wrong root, is a
//! [`ParseError`].

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tracing::warn;

use crate::error::{EntryError, EntryKind, ParseError};
use crate::types::{FormDescriptor, FormList, Manifest, MediaFileDescriptor};

/// Parse an OpenRosa `<xforms>` form list, or a legacy `<forms>` list.
pub fn parse_form_list(xml: &[u8]) -> Result<FormList, ParseError> {
    let doc = scan(xml)?;
    match doc.root.as_str() {
        "xforms" => Ok(openrosa_form_list(&doc.entries)),
        "forms" => Ok(legacy_form_list(&doc.entries)),
        other => Err(ParseError::UnexpectedRoot {
            expected: "xforms".to_string(),
            actual: other.to_string(),
        }),
    }
}

/// Parse a `<manifest>` document.
pub fn parse_manifest(xml: &[u8]) -> Result<Manifest, ParseError> {
    let doc = scan(xml)?;
    if doc.root != "manifest" {
        return Err(ParseError::UnexpectedRoot {
            expected: "manifest".to_string(),
            actual: doc.root,
        });
    }

    let mut manifest = Manifest::default();
    for (index, entry) in doc.entries.iter().filter(|e| e.name == "mediaFile").enumerate() {
        let filename = entry.field("filename");
        let hash = entry.field("hash");
        let download_url = entry.field("downloadUrl");

        match (filename, hash, download_url) {
            (Some(filename), Some(hash), Some(download_url)) => manifest.media_files.push(MediaFileDescriptor {
                filename,
                hash,
                download_url,
            }),
            (filename, hash, download_url) => {
                let mut missing = Vec::new();
                if filename.is_none() {
                    missing.push("filename");
                }
                if hash.is_none() {
                    missing.push("hash");
                }
                if download_url.is_none() {
                    missing.push("downloadUrl");
                }
                let err = EntryError {
                    kind: EntryKind::MediaFile,
                    index,
                    id: filename,
                    missing,
                };
                warn!(%err, "skipping manifest entry");
                manifest.invalid.push(err);
            }
        }
    }
    Ok(manifest)
}

fn openrosa_form_list(entries: &[RawEntry]) -> FormList {
    let mut list = FormList::default();
    for (index, entry) in entries.iter().filter(|e| e.name == "xform").enumerate() {
        let form_id = entry.field("formID");
        let name = entry.field("name");
        let download_url = entry.field("downloadUrl");

        match (form_id, name, download_url) {
            (Some(form_id), Some(display_name), Some(download_url)) => list.forms.push(FormDescriptor {
                form_id,
                display_name,
                version: entry.field("version"),
                hash: entry.field("hash"),
                download_url,
                manifest_url: entry.field("manifestUrl"),
            }),
            (form_id, name, download_url) => {
                let mut missing = Vec::new();
                if form_id.is_none() {
                    missing.push("formID");
                }
                if name.is_none() {
                    missing.push("name");
                }
                if download_url.is_none() {
                    missing.push("downloadUrl");
                }
                let err = EntryError {
                    kind: EntryKind::Form,
                    index,
                    id: form_id.or(name),
                    missing,
                };
                warn!(%err, "skipping form list entry");
                list.invalid.push(err);
            }
        }
    }
    list
}

/// `<forms><form url="...">Display name</form></forms>`: the url doubles as
/// the form id.
fn legacy_form_list(entries: &[RawEntry]) -> FormList {
    let mut list = FormList {
        legacy: true,
        ..FormList::default()
    };
    for (index, entry) in entries.iter().filter(|e| e.name == "form").enumerate() {
        let url = entry.attribute("url");
        let name = non_empty(&entry.text);

        match (url, name) {
            (Some(url), Some(display_name)) => list.forms.push(FormDescriptor {
                form_id: url.clone(),
                display_name,
                version: None,
                hash: None,
                download_url: url,
                manifest_url: None,
            }),
            (url, name) => {
                let mut missing = Vec::new();
                if url.is_none() {
                    missing.push("url");
                }
                if name.is_none() {
                    missing.push("name");
                }
                let err = EntryError {
                    kind: EntryKind::Form,
                    index,
                    id: url.or(name),
                    missing,
                };
                warn!(%err, "skipping legacy form list entry");
                list.invalid.push(err);
            }
        }
    }
    list
}

/// A child of the root element.
#[derive(Debug, Default)]
struct RawEntry {
    name: String,
    attributes: Vec<(String, String)>,
    /// Text directly inside the entry.
    text: String,
    /// Text-only children, in document order.
    fields: Vec<(String, String)>,
}

impl RawEntry {
    /// First non-empty value of a child element.
    fn field(&self, name: &str) -> Option<String> {
        self.fields
            .iter()
            .filter(|(n, _)| n == name)
            .find_map(|(_, v)| non_empty(v))
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.attributes
            .iter()
            .filter(|(n, _)| n == name)
            .find_map(|(_, v)| non_empty(v))
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

struct RawDocument {
    root: String,
    entries: Vec<RawEntry>,
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attributes(e: &BytesStart<'_>) -> Result<Vec<(String, String)>, ParseError> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| ParseError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| ParseError::Xml(e.to_string()))?;
        out.push((key, value.into_owned()));
    }
    Ok(out)
}

/// Reduce a document to its root name and first-level entries.
fn scan(xml: &[u8]) -> Result<RawDocument, ParseError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut root: Option<String> = None;
    let mut closed = false;
    let mut depth = 0usize;
    let mut entries = Vec::new();
    let mut entry: Option<RawEntry> = None;
    let mut field: Option<(String, String)> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ParseError::Xml(format!("{e} at byte {}", reader.buffer_position())))?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) | Event::Empty(ref e) => {
                let empty = matches!(event, Event::Empty(_));
                if closed {
                    return Err(ParseError::Xml("content after the root element".to_string()));
                }
                match depth {
                    0 => root = Some(local_name(e)),
                    1 => {
                        entry = Some(RawEntry {
                            name: local_name(e),
                            attributes: attributes(e)?,
                            ..RawEntry::default()
                        })
                    }
                    2 => field = Some((local_name(e), String::new())),
                    _ => {}
                }
                if empty {
                    // Close immediately.
                    match depth {
                        0 => closed = true,
                        1 => entries.extend(entry.take()),
                        2 => {
                            if let (Some(entry), Some(field)) = (entry.as_mut(), field.take()) {
                                entry.fields.push(field);
                            }
                        }
                        _ => {}
                    }
                } else {
                    depth += 1;
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                match depth {
                    0 => closed = true,
                    1 => entries.extend(entry.take()),
                    2 => {
                        if let (Some(entry), Some(field)) = (entry.as_mut(), field.take()) {
                            entry.fields.push(field);
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(ref e) => {
                let text = e.unescape().map_err(|e| ParseError::Xml(e.to_string()))?;
                push_text(depth, &mut entry, &mut field, &text);
            }
            Event::CData(e) => {
                let raw = e.into_inner();
                let text = String::from_utf8_lossy(&raw);
                push_text(depth, &mut entry, &mut field, &text);
            }
            _ => {}
        }
        buf.clear();
    }

    if depth != 0 {
        return Err(ParseError::Xml("unexpected end of document".to_string()));
    }
    let root = root.ok_or(ParseError::Empty)?;
    Ok(RawDocument { root, entries })
}

fn push_text(depth: usize, entry: &mut Option<RawEntry>, field: &mut Option<(String, String)>, text: &str) {
    match depth {
        2 => {
            if let Some(entry) = entry.as_mut() {
                entry.text.push_str(text);
            }
        }
        3 => {
            if let Some((_, value)) = field.as_mut() {
                value.push_str(text);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORM_LIST: &str = r#"<?xml version='1.0' encoding='UTF-8' ?>
<xforms xmlns="http://openrosa.org/xforms/xformsList">
<xform>
<formID>audio_question</formID>
<name>Audio Question</name>
<version>1</version>
<hash>md5:abcd1234</hash>
<downloadUrl>https://server.example.com/form?formId=0</downloadUrl>
</xform>
</xforms>"#;

    #[test]
    fn form_without_manifest_has_no_manifest_url() {
        let list = parse_form_list(FORM_LIST.as_bytes()).unwrap();
        assert_eq!(
            list.forms,
            vec![FormDescriptor {
                form_id: "audio_question".into(),
                display_name: "Audio Question".into(),
                version: Some("1".into()),
                hash: Some("md5:abcd1234".into()),
                download_url: "https://server.example.com/form?formId=0".into(),
                manifest_url: None,
            }]
        );
        assert!(list.invalid.is_empty());
        assert!(!list.legacy);
    }

    #[test]
    fn manifest_hash_tolerates_missing_prefix_and_padding() {
        let xml = r#"<manifest xmlns="http://openrosa.org/xforms/xformsManifest">
<mediaFile><filename>nombre.csv</filename>
<hash>md5:deadbeef </hash>
<downloadUrl>https://server.example.com/mediaFile/0/nombre.csv</downloadUrl>
</mediaFile>
<mediaFile><filename>logo.png</filename>
<hash>cafebabe</hash>
<downloadUrl>https://server.example.com/mediaFile/0/logo.png</downloadUrl>
</mediaFile>
</manifest>"#;
        let manifest = parse_manifest(xml.as_bytes()).unwrap();
        assert_eq!(manifest.media_files.len(), 2);
        assert_eq!(manifest.media_files[0].filename, "nombre.csv");
        assert_eq!(manifest.media_files[0].normalized_hash(), "deadbeef");
        assert_eq!(manifest.media_files[1].normalized_hash(), "cafebabe");
    }

    #[test]
    fn entry_missing_required_elements_is_reported_not_dropped() {
        let xml = r#"<xforms>
<xform><formID>broken</formID><version>2</version></xform>
<xform><formID>ok</formID><name>Ok</name><downloadUrl>https://x/form?formId=1</downloadUrl></xform>
</xforms>"#;
        let list = parse_form_list(xml.as_bytes()).unwrap();
        assert_eq!(list.forms.len(), 1);
        assert_eq!(list.forms[0].form_id, "ok");
        assert_eq!(
            list.invalid,
            vec![EntryError {
                kind: EntryKind::Form,
                index: 0,
                id: Some("broken".into()),
                missing: vec!["name", "downloadUrl"],
            }]
        );
    }

    #[test]
    fn empty_optional_elements_read_as_absent() {
        let xml = r#"<xforms><xform>
<formID>f</formID><name>F</name><version></version><hash/>
<downloadUrl>https://x/form</downloadUrl><manifestUrl>  </manifestUrl>
</xform></xforms>"#;
        let form = &parse_form_list(xml.as_bytes()).unwrap().forms[0];
        assert_eq!(form.version, None);
        assert_eq!(form.hash, None);
        assert_eq!(form.manifest_url, None);
    }

    #[test]
    fn escaped_text_and_cdata_are_decoded() {
        let xml = r#"<xforms><xform>
<formID>f</formID><name>Fish &amp; Chips</name>
<downloadUrl><![CDATA[https://x/form?formId=1&v=2]]></downloadUrl>
</xform></xforms>"#;
        let form = &parse_form_list(xml.as_bytes()).unwrap().forms[0];
        assert_eq!(form.display_name, "Fish & Chips");
        assert_eq!(form.download_url, "https://x/form?formId=1&v=2");
    }

    #[test]
    fn nested_elements_are_ignored() {
        let xml = r#"<xforms><xform>
<formID>f</formID><name>F</name><downloadUrl>https://x/form</downloadUrl>
<descriptionText><b>bold</b></descriptionText>
</xform></xforms>"#;
        let list = parse_form_list(xml.as_bytes()).unwrap();
        assert_eq!(list.forms.len(), 1);
    }

    #[test]
    fn legacy_form_list_uses_url_as_id() {
        let xml = r#"<forms>
<form url="https://x/formXml?formId=a">Form A</form>
<form>No url</form>
</forms>"#;
        let list = parse_form_list(xml.as_bytes()).unwrap();
        assert!(list.legacy);
        assert_eq!(list.forms.len(), 1);
        assert_eq!(list.forms[0].form_id, "https://x/formXml?formId=a");
        assert_eq!(list.forms[0].display_name, "Form A");
        assert_eq!(list.invalid[0].missing, vec!["url"]);
    }

    #[test]
    fn wrong_root_is_a_parse_error() {
        let err = parse_form_list(b"<html><body>Login</body></html>").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnexpectedRoot {
                expected: "xforms".into(),
                actual: "html".into()
            }
        );
        assert!(matches!(
            parse_manifest(FORM_LIST.as_bytes()),
            Err(ParseError::UnexpectedRoot { .. })
        ));
    }

    #[test]
    fn malformed_documents_are_parse_errors() {
        assert!(matches!(parse_form_list(b"<xforms><xform>"), Err(ParseError::Xml(_))));
        assert!(matches!(parse_form_list(b"<xforms></xform>"), Err(ParseError::Xml(_))));
        assert_eq!(parse_form_list(b"").unwrap_err(), ParseError::Empty);
        assert_eq!(parse_manifest(b"<?xml version='1.0'?>").unwrap_err(), ParseError::Empty);
    }

    #[test]
    fn empty_manifest_has_no_files() {
        let manifest = parse_manifest(b"<manifest/>").unwrap();
        assert!(manifest.media_files.is_empty());
        assert!(manifest.invalid.is_empty());
    }
}
