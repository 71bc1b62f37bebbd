//! Container Reader: opens the archive and locates the package document.

use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::Event;
use zip::ZipArchive;

use crate::error::{Error, Result};
use crate::util::{decode_text, extract_xml_encoding, strip_bom};

const CONTAINER_DESCRIPTOR: &str = "META-INF/container.xml";

/// An opened EPUB archive.
///
/// Resolves archive-relative paths for the rest of the ingestion pass; the
/// handle does not outlive the ingestion call.
pub struct Container {
    archive: ZipArchive<Cursor<Vec<u8>>>,
}

impl Container {
    /// Open raw EPUB bytes as a ZIP archive.
    pub fn open(bytes: Vec<u8>) -> Result<Self> {
        let archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| Error::InvalidArchive(e.to_string()))?;
        Ok(Self { archive })
    }

    /// Path of the package document, read from the container descriptor.
    pub fn rootfile_path(&mut self) -> Result<String> {
        let bytes = match self.read_bytes(CONTAINER_DESCRIPTOR) {
            Ok(bytes) => bytes,
            Err(Error::Zip(zip::result::ZipError::FileNotFound)) => {
                return Err(Error::MissingContainerDescriptor);
            }
            Err(e) => return Err(e),
        };
        parse_container_xml(&bytes)
    }

    /// Read an archive entry, with a percent-decoded fallback for malformed
    /// EPUBs whose manifests percent-encode entry names.
    pub fn read_bytes(&mut self, path: &str) -> Result<Vec<u8>> {
        match self.archive.by_name(path) {
            Ok(mut file) => {
                let mut contents = Vec::new();
                file.read_to_end(&mut contents)?;
                return Ok(contents);
            }
            Err(zip::result::ZipError::FileNotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let decoded = percent_encoding::percent_decode_str(path)
            .decode_utf8()
            .map_err(|_| Error::InvalidArchive(format!("invalid UTF-8 in path: {path}")))?;

        let mut file = self.archive.by_name(&decoded)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        Ok(contents)
    }

    /// Read an entry and decode it as text (UTF-8, declared charset, or
    /// Windows-1252, in that order).
    pub fn read_text(&mut self, path: &str) -> Result<String> {
        let bytes = self.read_bytes(path)?;
        let hint = extract_xml_encoding(&bytes);
        let (text, _) = decode_text(strip_bom(&bytes), hint);
        Ok(text.into_owned())
    }

}

/// Parse META-INF/container.xml and return the first declared rootfile path.
fn parse_container_xml(bytes: &[u8]) -> Result<String> {
    let (content, _) = decode_text(strip_bom(bytes), None);

    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.name().as_ref() == b"rootfile" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"full-path" {
                        return Ok(String::from_utf8_lossy(&attr.value).into_owned());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
    }

    Err(Error::InvalidPackage(
        "no rootfile declared in container descriptor".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_container_xml() {
        let container = br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

        assert_eq!(parse_container_xml(container).unwrap(), "OEBPS/content.opf");
    }

    #[test]
    fn test_parse_container_xml_with_bom() {
        let mut container = vec![0xEF, 0xBB, 0xBF];
        container.extend_from_slice(
            br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#,
        );

        assert_eq!(parse_container_xml(&container).unwrap(), "content.opf");
    }

    #[test]
    fn test_parse_container_xml_no_rootfile() {
        let container = br#"<?xml version="1.0"?>
<container version="1.0"><rootfiles/></container>"#;

        assert!(matches!(
            parse_container_xml(container),
            Err(Error::InvalidPackage(_))
        ));
    }

    #[test]
    fn test_open_rejects_garbage() {
        assert!(matches!(
            Container::open(b"not a zip archive".to_vec()),
            Err(Error::InvalidArchive(_))
        ));
    }
}
