/// Cuts generated text back to its last complete sentence or clause.
///
/// The last period that is not part of a number wins; failing that, text is
/// cut before the last comma; failing that, it is only trimmed.
pub fn prune(text: &str) -> String {
    let sentence_end = text.match_indices('.').rev().find(|(idx, _)| {
        !text[idx + 1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
    });
    if let Some((idx, _)) = sentence_end {
        return text[..=idx].trim().to_string();
    }

    if let Some(idx) = text.rfind(',') {
        return text[..idx].trim().to_string();
    }

    text.trim().to_string()
}
