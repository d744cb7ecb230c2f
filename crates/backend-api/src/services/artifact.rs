use crate::routes::models::{ArtifactStatus, ArtifactSummary};

const PREVIEW_EXTENSIONS: [&str; 2] = ["3mf", "stl"];
const STEP_EXTENSIONS: [&str; 2] = ["step", "stp"];

/// Pick the file the viewer should load. 3MF wins over STL; STEP files can
/// be downloaded but not previewed.
pub fn summarize_artifacts<S: AsRef<str>>(filenames: &[S]) -> ArtifactSummary {
    if let Some((preview, format)) = select_preview_file(filenames) {
        return ArtifactSummary {
            status: ArtifactStatus::Ready,
            preview_file: Some(preview.to_string()),
            format: Some(format.to_ascii_uppercase()),
            message: format!("Preview ready ({}).", format.to_ascii_uppercase()),
        };
    }

    let step = filenames
        .iter()
        .map(AsRef::as_ref)
        .find(|name| has_extension(name, &STEP_EXTENSIONS));

    match step {
        Some(_) => ArtifactSummary {
            status: ArtifactStatus::Downgraded,
            preview_file: None,
            format: Some("STEP".to_string()),
            message: "Only a STEP file was produced. It can be downloaded but not previewed."
                .to_string(),
        },
        None => ArtifactSummary {
            status: ArtifactStatus::Downgraded,
            preview_file: None,
            format: None,
            message: "The renderer produced no previewable model.".to_string(),
        },
    }
}

fn select_preview_file<S: AsRef<str>>(filenames: &[S]) -> Option<(&str, &'static str)> {
    PREVIEW_EXTENSIONS.iter().find_map(|extension| {
        filenames
            .iter()
            .map(AsRef::as_ref)
            .find(|name| has_extension(name, &[*extension]))
            .map(|name| (name, *extension))
    })
}

fn has_extension(filename: &str, extensions: &[&str]) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, extension)| {
            extensions
                .iter()
                .any(|candidate| extension.eq_ignore_ascii_case(candidate))
        })
        .unwrap_or(false)
}
