pub mod rgb;
pub mod stack;
pub mod stats;
pub mod stretch;

use std::path::{Path, PathBuf};

/// Expand the `%auto` primary-output placeholder to a sibling of
/// `input_dir` named after `default_name`. Any other path is returned
/// unchanged.
pub fn resolve_primary_output(requested: &str, input_dir: &Path, default_name: &str) -> PathBuf {
    if requested == "%auto" {
        input_dir.join(default_name)
    } else {
        PathBuf::from(requested)
    }
}

/// Expand the `%auto` placeholder for a secondary output (log, preview
/// image) by replacing `out_path`'s extension with `extension`. Any other
/// path is returned unchanged.
pub fn resolve_auto_extension(requested: &str, out_path: &Path, extension: &str) -> PathBuf {
    if requested == "%auto" {
        out_path.with_extension(extension)
    } else {
        PathBuf::from(requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_output_auto_joins_input_dir() {
        let resolved = resolve_primary_output("%auto", Path::new("/data/lights"), "stacked.fits");
        assert_eq!(resolved, PathBuf::from("/data/lights/stacked.fits"));
    }

    #[test]
    fn primary_output_explicit_path_passes_through() {
        let resolved = resolve_primary_output("/tmp/out.fits", Path::new("/data/lights"), "stacked.fits");
        assert_eq!(resolved, PathBuf::from("/tmp/out.fits"));
    }

    #[test]
    fn auto_extension_swaps_only_the_extension() {
        let resolved = resolve_auto_extension("%auto", Path::new("/data/lights/stacked.fits"), "log");
        assert_eq!(resolved, PathBuf::from("/data/lights/stacked.log"));
    }

    #[test]
    fn auto_extension_explicit_path_passes_through() {
        let resolved = resolve_auto_extension("run.log", Path::new("/data/lights/stacked.fits"), "log");
        assert_eq!(resolved, PathBuf::from("run.log"));
    }
}
