//! Build number extraction from the packaging manifest (`pom.xml`).

use std::io;
use std::path::{Path, PathBuf};

/// Element holding the build number.
pub const BUILD_NUMBER_ELEMENT: &str = "buildNumber";

/// Default manifest location inside the image.
pub const MANIFEST_PATH: &str = "/tmp/pom.xml";

/// Errors reading the manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The manifest could not be read.
    #[error("failed to read manifest {}: {source}", path.display())]
    Read {
        /// Manifest path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The manifest is not well-formed XML.
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] roxmltree::Error),
    /// No non-empty `buildNumber` element was found.
    #[error("manifest has no buildNumber element")]
    MissingBuildNumber,
}

/// Read the build number from the manifest at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or has no build number.
pub fn read_build_number(path: &Path) -> Result<String, ManifestError> {
    let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_build_number(&text)
}

/// Extract the first `buildNumber` element's text, ignoring XML namespaces.
///
/// # Errors
///
/// Returns an error for malformed XML or a missing/empty element.
pub fn parse_build_number(xml: &str) -> Result<String, ManifestError> {
    let doc = roxmltree::Document::parse(xml)?;
    doc.descendants()
        .find(|node| node.is_element() && node.tag_name().name() == BUILD_NUMBER_ELEMENT)
        .and_then(|node| node.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
        .ok_or(ManifestError::MissingBuildNumber)
}
