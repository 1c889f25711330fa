use std::path::{Path, PathBuf};

use thiserror::Error;

pub const BACKGROUND_REMOVED_SUFFIX: &str = "_no_bg";
pub const FINAL_COMPOSITE_SUFFIX: &str = "_final_ad";
pub const DERIVED_EXTENSION: &str = ".png";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    BackgroundRemoved,
    FinalComposite,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BackgroundRemoved => "background-removed",
            Self::FinalComposite => "final-composite",
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Self::BackgroundRemoved => BACKGROUND_REMOVED_SUFFIX,
            Self::FinalComposite => FINAL_COMPOSITE_SUFFIX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedArtifact {
    pub source_path: PathBuf,
    pub kind: ArtifactKind,
    pub derived_path: PathBuf,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("path has no usable file name: {0}")]
    NoFileName(String),
    #[error("'{0}' is not a background-removed artifact")]
    NotBackgroundRemoved(String),
}

/// `<dir>/<stem>_no_bg.png` for any stored upload.
pub fn background_removed_target(source: &Path) -> Result<DerivedArtifact, NamingError> {
    let stem = source
        .file_stem()
        .and_then(|v| v.to_str())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| NamingError::NoFileName(source.display().to_string()))?;
    Ok(derived(source, stem, ArtifactKind::BackgroundRemoved))
}

/// `<dir>/<stem>_final_ad.png`, only for names ending in `_no_bg.png`.
pub fn final_composite_target(source: &Path) -> Result<DerivedArtifact, NamingError> {
    let file_name = source
        .file_name()
        .and_then(|v| v.to_str())
        .ok_or_else(|| NamingError::NoFileName(source.display().to_string()))?;
    let stem = file_name
        .strip_suffix(DERIVED_EXTENSION)
        .and_then(|v| v.strip_suffix(BACKGROUND_REMOVED_SUFFIX))
        .filter(|v| !v.is_empty())
        .ok_or_else(|| NamingError::NotBackgroundRemoved(file_name.to_string()))?;
    Ok(derived(source, stem, ArtifactKind::FinalComposite))
}

pub fn is_background_removed_name(file_name: &str) -> bool {
    final_composite_target(Path::new(file_name)).is_ok()
}

fn derived(source: &Path, stem: &str, kind: ArtifactKind) -> DerivedArtifact {
    let file_name = format!("{stem}{}{DERIVED_EXTENSION}", kind.suffix());
    let derived_path = match source.parent() {
        Some(parent) => parent.join(file_name),
        None => PathBuf::from(file_name),
    };
    DerivedArtifact {
        source_path: source.to_path_buf(),
        kind,
        derived_path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_removed_target_appends_suffix_and_forces_png() {
        let target = background_removed_target(Path::new("/srv/uploads/169_shoe.jpg"))
            .expect("target should build");
        assert_eq!(target.kind, ArtifactKind::BackgroundRemoved);
        assert_eq!(
            target.derived_path,
            PathBuf::from("/srv/uploads/169_shoe_no_bg.png")
        );
    }

    #[test]
    fn final_composite_target_swaps_the_removal_suffix() {
        let target = final_composite_target(Path::new("/srv/uploads/169_shoe_no_bg.png"))
            .expect("target should build");
        assert_eq!(target.kind, ArtifactKind::FinalComposite);
        assert_eq!(
            target.derived_path,
            PathBuf::from("/srv/uploads/169_shoe_final_ad.png")
        );
    }

    #[test]
    fn final_composite_target_rejects_names_without_removal_suffix() {
        for name in [
            "/srv/uploads/169_shoe.png",
            "/srv/uploads/169_shoe_no_bg.jpg",
            "/srv/uploads/169_shoe_final_ad.png",
            "/srv/uploads/_no_bg.png",
        ] {
            let err = final_composite_target(Path::new(name)).expect_err(name);
            assert!(matches!(err, NamingError::NotBackgroundRemoved(_)), "{name}");
        }
    }

    #[test]
    fn derivation_chain_is_deterministic() {
        let upload = Path::new("/srv/uploads/1697000000000_shoe.webp");
        let removed = background_removed_target(upload).expect("removal target");
        let composite =
            final_composite_target(removed.derived_path.as_path()).expect("composite target");

        assert_eq!(
            composite.derived_path,
            PathBuf::from("/srv/uploads/1697000000000_shoe_final_ad.png")
        );
        assert_eq!(
            background_removed_target(upload).expect("again"),
            removed
        );
    }
}
