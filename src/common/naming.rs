//! Object naming shared by the worker and the API consumers.

/// Derives the name of a variant from its source name: `name.ext` becomes
/// `name_<label>.ext`.
///
/// Only the final path segment is inspected and the split happens at its
/// last `.`, so `my.clip.mp4` maps to `my.clip_144p.mp4`. Names without an
/// extension get the suffix appended.
pub fn derive_output_name(source: &str, label: &str) -> String {
    let segment_start = source.rfind('/').map(|i| i + 1).unwrap_or(0);

    match source[segment_start..].rfind('.') {
        // A leading dot (".hidden") is part of the stem, not an extension.
        Some(dot) if dot > 0 => {
            let split = segment_start + dot;
            format!("{}_{}{}", &source[..split], label, &source[split..])
        }
        _ => format!("{}_{}", source, label),
    }
}

/// Last path segment of an object key, used for local scratch files.
pub fn local_file_name(key: &str) -> &str {
    key.rsplit('/').find(|s| !s.is_empty()).unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_label_before_extension() {
        assert_eq!(derive_output_name("clip.mp4", "144p"), "clip_144p.mp4");
        assert_eq!(derive_output_name("clip.mp4", "1080p"), "clip_1080p.mp4");
    }

    #[test]
    fn splits_on_last_dot_only() {
        assert_eq!(derive_output_name("my.clip.mp4", "360p"), "my.clip_360p.mp4");
    }

    #[test]
    fn ignores_dots_in_directories() {
        assert_eq!(derive_output_name("v1.2/clip.mov", "720p"), "v1.2/clip_720p.mov");
        assert_eq!(derive_output_name("v1.2/clip", "720p"), "v1.2/clip_720p");
    }

    #[test]
    fn names_without_extension_get_a_suffix() {
        assert_eq!(derive_output_name("clip", "240p"), "clip_240p");
        assert_eq!(derive_output_name(".hidden", "240p"), ".hidden_240p");
    }

    #[test]
    fn derivation_is_deterministic() {
        for name in ["clip.mp4", "a.b.c", "dir/x.webm", "noext"] {
            assert_eq!(derive_output_name(name, "480p"), derive_output_name(name, "480p"));
        }
    }

    #[test]
    fn local_name_is_last_segment() {
        assert_eq!(local_file_name("uploads/2024/clip.mp4"), "clip.mp4");
        assert_eq!(local_file_name("clip.mp4"), "clip.mp4");
        assert_eq!(local_file_name("uploads/clip.mp4/"), "clip.mp4");
    }
}
