//! Operation classification and answer formatting.

use serde::Serialize;
use tracing::debug;

use crate::lexer::{normalize, resolve, tokenize};

/// Requested arithmetic, in classification precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Reduce,
    Total,
    Multiply,
    Divide,
    Net,
    /// No keyword matched: sum of all numbers.
    Default,
    /// Exactly one number was found.
    Identity,
}

/// Whole-word keywords match only a complete word; prefix keywords match any
/// word that starts with them.
#[derive(Debug, Clone, Copy)]
enum Keyword {
    Word(&'static str),
    Prefix(&'static str),
}

use self::Keyword::{Prefix, Word};

const PRECEDENCE: &[(Operation, &[Keyword])] = &[
    (
        Operation::Reduce,
        &[
            Prefix("slow"),
            Prefix("reduc"),
            Prefix("subtract"),
            Word("minus"),
            Word("less"),
            Word("lose"),
            Word("loses"),
            Word("lost"),
            Prefix("remov"),
            Prefix("decreas"),
            Word("drop"),
            Word("drops"),
            Word("fall"),
            Word("falls"),
            Word("fell"),
        ],
    ),
    (
        Operation::Total,
        &[
            Word("total"),
            Word("sum"),
            Prefix("combin"),
            Prefix("togeth"),
            Prefix("add"),
            Word("plus"),
            Word("both"),
        ],
    ),
    (
        Operation::Multiply,
        &[Prefix("multipl"), Word("times"), Word("product")],
    ),
    (
        Operation::Divide,
        &[
            Prefix("divid"),
            Word("split"),
            Word("ratio"),
            Prefix("shared equal"),
        ],
    ),
    (
        Operation::Net,
        &[
            Word("net"),
            Prefix("remain"),
            Word("left over"),
            Word("after"),
            Prefix("result"),
            Word("final"),
        ],
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Run {
    letter: char,
    len: usize,
}

fn runs(word: &str) -> Vec<Run> {
    let mut out: Vec<Run> = Vec::new();
    for letter in word.chars().filter(char::is_ascii_alphabetic) {
        match out.last_mut() {
            Some(run) if run.letter == letter => run.len += 1,
            _ => out.push(Run { letter, len: 1 }),
        }
    }
    out
}

/// Letters of the challenge as runs of identical letters, remembering where
/// words start and end.
///
/// Any non-letter separates words. A keyword may continue across a separator
/// ("mi-nus") but must begin where a word begins, and a whole-word keyword must
/// also end where a word ends. Doubled letters only lengthen a run, so a run
/// matches a keyword run at least as short.
#[derive(Debug, Default)]
struct WordRuns {
    runs: Vec<Run>,
    starts: Vec<bool>,
    ends: Vec<bool>,
}

impl WordRuns {
    fn new(text: &str) -> Self {
        let mut words = WordRuns::default();
        let mut in_word = false;
        for ch in text.chars().flat_map(char::to_lowercase) {
            if !ch.is_ascii_lowercase() {
                in_word = false;
                continue;
            }
            if !in_word {
                if let Some(end) = words.ends.last_mut() {
                    *end = true;
                }
            }
            match words.runs.last_mut() {
                Some(run) if run.letter == ch => run.len += 1,
                _ => {
                    words.runs.push(Run { letter: ch, len: 1 });
                    words.starts.push(false);
                    words.ends.push(false);
                }
            }
            if !in_word {
                if let Some(start) = words.starts.last_mut() {
                    *start = true;
                }
            }
            in_word = true;
        }
        if let Some(last) = words.ends.last_mut() {
            *last = true;
        }
        words
    }

    fn matches_at(&self, at: usize, keyword: &[Run], whole: bool) -> bool {
        let Some(window) = self.runs.get(at..at + keyword.len()) else {
            return false;
        };
        let letters_match = window
            .iter()
            .zip(keyword)
            .all(|(run, want)| run.letter == want.letter && run.len >= want.len);
        letters_match && (!whole || self.ends[at + keyword.len() - 1])
    }

    fn contains(&self, keyword: Keyword) -> bool {
        let (text, whole) = match keyword {
            Word(text) => (text, true),
            Prefix(text) => (text, false),
        };
        let keyword = runs(text);
        if keyword.is_empty() {
            return false;
        }
        (0..self.runs.len()).any(|at| self.starts[at] && self.matches_at(at, &keyword, whole))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Solution {
    pub numbers: Vec<u64>,
    pub operation: Operation,
    pub answer: String,
}

/// Operation families with a keyword in `text`, in precedence order.
fn matched_operations(text: &str) -> Vec<Operation> {
    let words = WordRuns::new(text);
    PRECEDENCE
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|kw| words.contains(*kw)))
        .map(|(op, _)| *op)
        .collect()
}

fn apply(operation: Operation, numbers: &[f64]) -> Option<f64> {
    let (first, rest) = numbers.split_first()?;
    match operation {
        Operation::Reduce | Operation::Net => Some(rest.iter().fold(*first, |acc, n| acc - n)),
        Operation::Total | Operation::Default => Some(numbers.iter().sum()),
        Operation::Multiply => Some(numbers.iter().product()),
        Operation::Divide => match numbers {
            [a, b] if *b != 0.0 => Some(a / b),
            _ => None,
        },
        Operation::Identity => Some(*first),
    }
}

/// Read the numbers and the requested operation from `text` and compute the
/// answer.
pub fn analyze(text: &str) -> Solution {
    let numbers = resolve(&tokenize(&normalize(text)));
    let values: Vec<f64> = numbers.iter().map(|n| *n as f64).collect();

    let (operation, result) = match values.len() {
        0 => (Operation::Identity, 0.0),
        1 => (Operation::Identity, values[0]),
        _ => matched_operations(text)
            .into_iter()
            .find_map(|op| apply(op, &values).map(|r| (op, r)))
            .unwrap_or((Operation::Default, values.iter().sum())),
    };

    let answer = format!("{:.2}", result);
    debug!(?numbers, ?operation, %answer, "solved challenge");

    Solution {
        numbers,
        operation,
        answer,
    }
}

/// Answer to a verification challenge, formatted with two decimals.
pub fn solve(text: &str) -> String {
    analyze(text).answer
}
