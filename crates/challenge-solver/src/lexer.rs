//! Normalization, number-word tokenization and compound resolution.

use std::sync::OnceLock;

const NUMBER_WORDS: &[(&str, u64)] = &[
    ("zero", 0),
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("eleven", 11),
    ("twelve", 12),
    ("thirteen", 13),
    ("fourteen", 14),
    ("fifteen", 15),
    ("sixteen", 16),
    ("seventeen", 17),
    ("eighteen", 18),
    ("nineteen", 19),
    ("twenty", 20),
    ("thirty", 30),
    ("forty", 40),
    ("fifty", 50),
    ("sixty", 60),
    ("seventy", 70),
    ("eighty", 80),
    ("ninety", 90),
    ("hundred", 100),
    ("thousand", 1000),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Number(u64),
    Hundred,
    Thousand,
}

impl Token {
    fn value(&self) -> u64 {
        match self {
            Token::Number(v) => *v,
            Token::Hundred => 100,
            Token::Thousand => 1000,
        }
    }
}

struct DictEntry {
    word: String,
    token: Token,
}

/// Collapsed number words, longest first.
fn dictionary() -> &'static [DictEntry] {
    static DICT: OnceLock<Vec<DictEntry>> = OnceLock::new();
    DICT.get_or_init(|| {
        let mut entries: Vec<DictEntry> = NUMBER_WORDS
            .iter()
            .map(|(word, value)| DictEntry {
                word: collapse_runs(word),
                token: match value {
                    100 => Token::Hundred,
                    1000 => Token::Thousand,
                    v => Token::Number(*v),
                },
            })
            .collect();
        entries.sort_by(|a, b| b.word.len().cmp(&a.word.len()).then(a.word.cmp(&b.word)));
        entries
    })
}

/// Collapse every run of two or more identical letters to one letter.
/// Digit runs are left untouched.
fn collapse_runs(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut prev: Option<char> = None;
    for ch in input.chars() {
        if ch.is_ascii_alphabetic() && prev == Some(ch) {
            continue;
        }
        out.push(ch);
        prev = Some(ch);
    }
    out
}

/// Lowercase, keep only `[a-z0-9]`, then collapse doubled letters.
pub fn normalize(text: &str) -> String {
    let stripped: String = text
        .chars()
        .flat_map(|c| c.to_lowercase())
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    collapse_runs(&stripped)
}

/// A dictionary or digit match with its byte span in the normalized stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lexeme {
    pub token: Token,
    pub start: usize,
    pub end: usize,
}

/// Tokenize a normalized stream against digit runs and the collapsed
/// dictionary. Unmatched characters are skipped one at a time.
///
/// Stripping whitespace and collapsing runs can merge the last letter of one
/// number word with the identical first letter of the next ("seven nine" ->
/// "sevenine"). Right after a word match, a dictionary word whose first letter
/// equals the previous match's last letter may start one character early.
pub fn tokenize(normalized: &str) -> Vec<Lexeme> {
    let bytes = normalized.as_bytes();
    let mut lexemes = Vec::new();
    let mut i = 0usize;
    let mut last_word_end: Option<usize> = None;

    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if let Ok(value) = normalized[start..i].parse::<u64>() {
                lexemes.push(Lexeme {
                    token: Token::Number(value),
                    start,
                    end: i,
                });
            }
            last_word_end = None;
            continue;
        }

        let rest = &normalized[i..];
        if let Some(entry) = dictionary().iter().find(|e| rest.starts_with(e.word.as_str())) {
            lexemes.push(Lexeme {
                token: entry.token,
                start: i,
                end: i + entry.word.len(),
            });
            i += entry.word.len();
            last_word_end = Some(i);
            continue;
        }

        if last_word_end == Some(i) && i > 0 {
            let shared = bytes[i - 1];
            let overlapped = dictionary().iter().find(|e| {
                e.word.as_bytes().first() == Some(&shared) && rest.starts_with(&e.word[1..])
            });
            if let Some(entry) = overlapped {
                let end = i - 1 + entry.word.len();
                lexemes.push(Lexeme {
                    token: entry.token,
                    start: i - 1,
                    end,
                });
                i = end;
                last_word_end = Some(i);
                continue;
            }
        }

        i += 1;
        last_word_end = None;
    }

    lexemes
}

fn is_tens(token: Token) -> bool {
    matches!(token, Token::Number(v) if (20..=90).contains(&v) && v % 10 == 0)
}

fn is_unit(token: Token) -> bool {
    matches!(token, Token::Number(v) if (1..=9).contains(&v))
}

fn is_small(token: Token) -> bool {
    matches!(token, Token::Number(v) if (1..=19).contains(&v))
}

/// Walks the token stream left to right. Neighbouring tokens combine
/// whatever text separated them in the challenge.
struct Resolver<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Resolver<'a> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    /// Tens with an optional unit, or a single 1..=19, after a hundred or
    /// thousand multiplier.
    fn absorb_addendum(&mut self, value: &mut u64) {
        match self.peek() {
            Some(token) if is_tens(token) => {
                *value += token.value();
                self.pos += 1;
                if let Some(u) = self.peek().filter(|t| is_unit(*t)) {
                    *value += u.value();
                    self.pos += 1;
                }
            }
            Some(token) if is_small(token) => {
                *value += token.value();
                self.pos += 1;
            }
            _ => {}
        }
    }

    fn next_number(&mut self) -> Option<u64> {
        let first = self.peek()?;
        self.pos += 1;
        let mut value = first.value();
        if !matches!(first, Token::Number(_)) {
            return Some(value);
        }

        match self.peek() {
            Some(unit) if is_tens(first) && is_unit(unit) => {
                value += unit.value();
                self.pos += 1;
            }
            Some(Token::Hundred) => {
                value *= 100;
                self.pos += 1;
                self.absorb_addendum(&mut value);
            }
            _ => {}
        }

        if self.peek() == Some(Token::Thousand) {
            value = value.saturating_mul(1000);
            self.pos += 1;
            if let (Some(Token::Number(hundreds)), Some(Token::Hundred)) =
                (self.peek(), self.tokens.get(self.pos + 1).copied())
            {
                value = value.saturating_add(hundreds.saturating_mul(100));
                self.pos += 2;
            }
            self.absorb_addendum(&mut value);
        }

        Some(value)
    }
}

/// Combine neighbouring lexemes into numbers, left to right.
pub fn resolve(lexemes: &[Lexeme]) -> Vec<u64> {
    let tokens: Vec<Token> = lexemes.iter().map(|l| l.token).collect();
    let mut resolver = Resolver {
        tokens: &tokens,
        pos: 0,
    };
    let mut numbers = Vec::new();
    while let Some(n) = resolver.next_number() {
        numbers.push(n);
    }
    numbers
}

/// Normalize, tokenize and resolve compound numbers in one pass.
pub fn extract_numbers(text: &str) -> Vec<u64> {
    resolve(&tokenize(&normalize(text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<Token> {
        tokenize(&normalize(text)).into_iter().map(|l| l.token).collect()
    }

    #[test]
    fn test_normalize_defeats_case_and_doubling() {
        assert_eq!(normalize("ThIrTtYy FiVee"), normalize("thirty five"));
        assert_eq!(normalize("Tw-en Ty"), "twenty");
    }

    #[test]
    fn test_dictionary_is_collapsed() {
        assert!(dictionary().iter().any(|e| e.word == "thre"));
        assert!(dictionary().iter().any(|e| e.word == "seventen"));
        assert!(!dictionary().iter().any(|e| e.word == "three"));
    }

    #[test]
    fn test_longest_match_first() {
        assert_eq!(tokens("seventeen"), vec![Token::Number(17)]);
        assert_eq!(tokens("sixty"), vec![Token::Number(60)]);
        assert_eq!(tokens("eighteen"), vec![Token::Number(18)]);
    }

    #[test]
    fn test_same_token_stream_under_obfuscation() {
        assert_eq!(tokens("ThIrTtYy FiVee"), tokens("thirty five"));
        assert_eq!(tokens("thirty five"), vec![Token::Number(30), Token::Number(5)]);
    }

    #[test]
    fn test_compound_numbers() {
        assert_eq!(extract_numbers("forty two"), vec![42]);
        assert_eq!(extract_numbers("five hundred twenty three"), vec![523]);
        assert_eq!(extract_numbers("three hundred twelve"), vec![312]);
        assert_eq!(extract_numbers("twenty three and sixteen"), vec![23, 16]);
        assert_eq!(extract_numbers("two thousand five hundred"), vec![2500]);
    }

    #[test]
    fn test_digits_are_read_literally() {
        assert_eq!(extract_numbers("it moves 35 meters then 7"), vec![35, 7]);
    }

    #[test]
    fn test_merged_boundary_letter() {
        assert_eq!(extract_numbers("seven nine"), vec![7, 9]);
        assert_eq!(extract_numbers("three eight"), vec![3, 8]);
    }

    #[test]
    fn test_separate_tokens_stay_separate() {
        assert_eq!(extract_numbers("ten twelve"), vec![10, 12]);
        assert_eq!(extract_numbers("twenty thirty"), vec![20, 30]);
        assert_eq!(extract_numbers("eight by twenty"), vec![8, 20]);
        assert_eq!(extract_numbers("forty then fourteen"), vec![40, 14]);
    }

    #[test]
    fn test_compounds_join_across_filler_words() {
        assert_eq!(extract_numbers("five hundred and six"), vec![506]);
        assert_eq!(extract_numbers("twenty and three"), vec![23]);
        assert_eq!(extract_numbers("twenty by eight"), vec![28]);
        assert_eq!(extract_numbers("six, hundred... twelve"), vec![612]);
    }

    #[test]
    fn test_thousand_groups() {
        assert_eq!(extract_numbers("three thousand two hundred forty one"), vec![3241]);
        assert_eq!(extract_numbers("one thousand and nine"), vec![1009]);
    }
}
