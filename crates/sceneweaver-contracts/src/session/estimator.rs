const TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Splits story text into sentences on runs of `.`, `!` and `?`.
///
/// Whitespace is collapsed first. Segments made only of punctuation are dropped; trailing text
/// without a terminator counts as a sentence of its own.
pub fn split_sentences(text: &str) -> Vec<String> {
    let normalized = text.split_whitespace().collect::<Vec<&str>>().join(" ");
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = normalized.chars().peekable();
    while let Some(ch) = chars.next() {
        current.push(ch);
        if !is_terminator(ch) {
            continue;
        }
        while let Some(next) = chars.next_if(|candidate| is_terminator(*candidate)) {
            current.push(next);
        }
        push_sentence(&mut sentences, &mut current);
    }
    push_sentence(&mut sentences, &mut current);
    sentences
}

/// Expected number of generated frames for `text`: one per sentence, never less than one.
///
/// This only sizes the progress bar; the backend decides the real count.
pub fn estimate_images(text: &str) -> usize {
    split_sentences(text).len().max(1)
}

fn is_terminator(ch: char) -> bool {
    TERMINATORS.contains(&ch)
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if trimmed.chars().any(|ch| !is_terminator(ch)) {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}
