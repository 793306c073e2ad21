//! Text chunking for speech synthesis
//!
//! Synthesis engines answer faster (and fail less) on short inputs, so an
//! article is cut into sentence-aligned chunks of roughly [`DEFAULT_LIMIT`]
//! characters. The limit is a soft target: a single sentence longer than the
//! limit becomes its own chunk instead of being split mid-sentence.

use std::sync::LazyLock;

use regex::Regex;

/// Default soft chunk size, in characters
pub const DEFAULT_LIMIT: usize = 100;

/// Escape artifacts left behind by script-extracted page text, plus whitespace runs
static ARTIFACT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\\n|\\"|\\t|\s+"#).expect("valid regex"));

/// An ordered, speakable segment of an article
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based position within the article
    pub index: usize,
    /// Text to synthesize
    pub text: String,
}

/// Split `text` into sentence-aligned chunks of about `limit` characters.
///
/// When `limit` is 0, [`DEFAULT_LIMIT`] is used. Empty or whitespace-only
/// input yields no chunks. Every returned chunk is non-empty and indexed
/// in order.
///
/// # Examples
///
/// ```
/// use beacon_reader::tts::chunk_text;
///
/// let chunks = chunk_text("Hello world. This is a test? Yes!", 100);
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].text, "Hello world. This is a test? Yes!");
/// ```
#[must_use]
pub fn chunk_text(text: &str, limit: usize) -> Vec<Chunk> {
    let limit = if limit == 0 { DEFAULT_LIMIT } else { limit };
    let normalized = normalize(text);

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for fragment in split_on_sentences(&normalized) {
        let fragment_len = fragment.chars().count();

        if current.is_empty() || fragment.trim().is_empty() || current_len + fragment_len <= limit
        {
            current.push_str(fragment);
            current_len += fragment_len;
        } else {
            chunks.push(std::mem::take(&mut current));
            current.push_str(fragment);
            current_len = fragment_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .enumerate()
        .map(|(index, text)| Chunk {
            index,
            text: text.to_string(),
        })
        .collect()
}

/// Strip escape artifacts (`\n`, `\"`, `\t` as literal text) and collapse whitespace
#[must_use]
pub fn normalize(text: &str) -> String {
    ARTIFACT_REGEX
        .replace_all(text, |caps: &regex::Captures<'_>| match &caps[0] {
            r#"\""# | r"\t" => "",
            _ => " ",
        })
        .into_owned()
}

/// Split text after sentence-ending punctuation.
///
/// A `.` only ends a sentence when it is not followed by a digit, so decimals
/// like `3.14` stay whole. Only period and question marks end a sentence;
/// `!` does not. The punctuation stays attached to its sentence.
fn split_on_sentences(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let next = chars.peek().map(|&(_, n)| n);
        let is_sentence_end = match c {
            '.' => !next.is_some_and(|n| n.is_ascii_digit()),
            '。' | '？' | '?' => true,
            _ => false,
        };

        if is_sentence_end {
            let end = i + c.len_utf8();
            segments.push(&text[start..end]);
            start = end;
        }
    }

    if start < text.len() {
        segments.push(&text[start..]);
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    fn content(text: &str) -> String {
        normalize(text).chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn empty_input_returns_empty() {
        assert!(chunk_text("", 100).is_empty());
        assert!(chunk_text("   \n\t ", 100).is_empty());
    }

    #[test]
    fn short_sentences_fit_one_chunk() {
        let chunks = chunk_text("Hello world. This is a test? Yes!", 100);
        assert_eq!(texts(&chunks), vec!["Hello world. This is a test? Yes!"]);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn zero_limit_uses_default() {
        let sentence = format!("{}.", "a".repeat(60));
        let text = format!("{sentence} {sentence}");
        assert_eq!(chunk_text(&text, 0).len(), 2);
    }

    #[test]
    fn long_sentences_get_their_own_chunks() {
        let sentence = format!("{}.", "w".repeat(79));
        let text = [sentence.as_str(); 3].join(" ");

        let chunks = chunk_text(&text, 100);
        assert!((2..=3).contains(&chunks.len()), "got {chunks:?}");
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 160));
        assert!(chunks.iter().all(|c| c.text.ends_with('.')));
    }

    #[test]
    fn oversized_sentence_is_not_split() {
        let sentence = format!("{} end.", "word ".repeat(60));
        let chunks = chunk_text(&sentence, 100);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.chars().count() > 100);
    }

    #[test]
    fn decimals_do_not_end_sentences() {
        let segments = split_on_sentences("Pi is 3.14 roughly. Done");
        assert_eq!(segments, vec!["Pi is 3.14 roughly.", " Done"]);
    }

    #[test]
    fn cjk_punctuation_ends_sentences() {
        let segments = split_on_sentences("你好。你是谁？我很好");
        assert_eq!(segments, vec!["你好。", "你是谁？", "我很好"]);
    }

    #[test]
    fn exclamation_marks_do_not_end_sentences() {
        assert_eq!(split_on_sentences("Wow! Great."), vec!["Wow! Great."]);
        let chunks = chunk_text("Wow! Great.", 5);
        assert_eq!(texts(&chunks), vec!["Wow! Great."]);
    }

    #[test]
    fn cjk_limit_counts_characters_not_bytes() {
        // 33 characters but 99 bytes
        let text = "一二三四五六七八九十。".repeat(3);
        let chunks = chunk_text(&text, 40);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn escape_artifacts_are_normalized() {
        let chunks = chunk_text(r#"First line.\nSecond \"quoted\"\tline."#, 100);
        assert_eq!(texts(&chunks), vec!["First line. Second quotedline."]);
    }

    #[test]
    fn trailing_punctuation_produces_no_empty_chunk() {
        let chunks = chunk_text("One. Two. ", 4);
        assert_eq!(texts(&chunks), vec!["One.", "Two."]);
    }

    #[test]
    fn indices_are_sequential() {
        let text = "A sentence here. ".repeat(20);
        let chunks = chunk_text(&text, 30);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn chunks_reconstruct_original_content() {
        let text = "The quick brown fox jumps over the lazy dog. It was 2.5 meters high! \
            Was it? Nobody knows.\n\nA new paragraph starts here。それから？ Fin";
        for limit in [5, 20, 50, 100, 1000] {
            let chunks = chunk_text(text, limit);
            assert!(chunks.iter().all(|c| !c.text.is_empty()));
            let joined = texts(&chunks).join(" ");
            assert_eq!(content(&joined), content(text), "limit {limit}");
        }
    }
}
