//! Solver for obfuscated arithmetic word problems used as publish
//! verification challenges.
//!
//! Challenges arrive with scrambled letter case, punctuation or whitespace
//! splitting words, and doubled letters. Numbers are read from a single
//! normalized letter/digit stream. The operation is read from the words,
//! with keywords matched at word starts.

pub mod lexer;
pub mod solver;

pub use lexer::{extract_numbers, normalize, tokenize, Lexeme, Token};
pub use solver::{analyze, solve, Operation, Solution};
