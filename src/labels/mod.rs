/// Normalizes a user-supplied device or action label for storage lookup.
///
/// Stored codes are keyed by the sanitized pair, while events shown to the
/// user keep the raw labels. Lowercases, maps common accented characters to
/// ASCII, turns every other non-alphanumeric character into an underscore
/// separator, collapses underscore runs, and falls back to `"unknown"` when
/// nothing survives.
pub fn sanitize_label(raw: &str) -> String {
    const REPLACEMENTS: &[(char, &str)] = &[
        ('ä', "ae"),
        ('ö', "oe"),
        ('ü', "ue"),
        ('ß', "ss"),
        ('á', "a"),
        ('à', "a"),
        ('â', "a"),
        ('ã', "a"),
        ('å', "a"),
        ('é', "e"),
        ('è', "e"),
        ('ê', "e"),
        ('ë', "e"),
        ('í', "i"),
        ('ì', "i"),
        ('î', "i"),
        ('ï', "i"),
        ('ó', "o"),
        ('ò', "o"),
        ('ô', "o"),
        ('õ', "o"),
        ('ú', "u"),
        ('ù', "u"),
        ('û', "u"),
        ('ñ', "n"),
        ('ç', "c"),
    ];

    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars().flat_map(|c| c.to_lowercase()) {
        if let Some((_, replacement)) = REPLACEMENTS.iter().find(|(from, _)| *from == ch) {
            out.push_str(replacement);
            continue;
        }
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            out.push(ch);
        } else {
            // Whitespace, hyphens, slashes, and unmapped characters all act
            // as separators so "Living Room A/V" keys as living_room_a_v.
            out.push('_');
        }
    }

    let mut collapsed = String::with_capacity(out.len());
    for ch in out.chars() {
        if ch == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(ch);
    }
    let trimmed = collapsed.trim_matches('_');

    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spaces_become_underscores() {
        assert_eq!(sanitize_label("My TV Remote"), "my_tv_remote");
    }

    #[test]
    fn umlauts_map_to_ascii_pairs() {
        assert_eq!(sanitize_label("Fernbedienung Küche"), "fernbedienung_kueche");
    }

    #[test]
    fn punctuation_is_stripped_without_joining_words() {
        assert_eq!(sanitize_label("Living Room A/V"), "living_room_a_v");
    }

    #[test]
    fn empty_input_falls_back_to_unknown() {
        assert_eq!(sanitize_label(""), "unknown");
        assert_eq!(sanitize_label("---"), "unknown");
        assert_eq!(sanitize_label("!!!"), "unknown");
    }

    #[test]
    fn underscore_runs_collapse() {
        assert_eq!(sanitize_label("tv  -  power"), "tv_power");
        assert_eq!(sanitize_label("_tv_"), "tv");
    }
}
