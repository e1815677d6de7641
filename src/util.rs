use std::path::Path;

pub fn display_path(path: &Path, base: Option<&Path>) -> String {
    if let Some(base) = base {
        if let Ok(relative) = path.strip_prefix(base) {
            return relative.display().to_string();
        }
    }
    path.display().to_string()
}

pub fn truncate_string(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut truncated = String::new();
    for ch in text.chars() {
        if truncated.len() + ch.len_utf8() > max_bytes {
            break;
        }
        truncated.push(ch);
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_string("héllo", 2), "h");
        assert_eq!(truncate_string("héllo", 3), "hé");
        assert_eq!(truncate_string("short", 10), "short");
    }

    #[test]
    fn display_path_strips_base_when_possible() {
        let base = Path::new("/srv/artifacts");
        assert_eq!(
            display_path(Path::new("/srv/artifacts/requests/a/main.tf"), Some(base)),
            "requests/a/main.tf"
        );
        assert_eq!(display_path(Path::new("/other/x"), Some(base)), "/other/x");
    }
}
