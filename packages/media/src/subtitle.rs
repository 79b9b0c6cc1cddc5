/// Empty WebVTT document written for each configured language.
pub const VTT_STUB: &str = "WEBVTT\n\n";

pub fn subtitle_file_name(uid: &str, lang: &str) -> String {
    format!("{uid}-{lang}.vtt")
}
