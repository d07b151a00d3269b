//! Tokenizer
//!
//! Builds one big alternation regex out of named capture groups, in the exact
//! order multi-character operators must precede their single-character
//! prefixes (`<<=` before `<<` before `<`, and so on). For each match the
//! highest-numbered matching group wins, which is how overlapping patterns
//! like `identifier` and the keyword literals stay disambiguated purely by
//! table position rather than by a second keyword lookup pass.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{CompileError, LexerError, SourceMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    AssignBitshiftLeft,
    AssignBitshiftRight,

    UnopDecrement,
    BinopBitshiftLeft,
    BinopBitshiftRight,
    BinopAnd,
    BinopOr,
    BinopEqualTo,
    BinopNotEqual,
    BinopLessThanOrEqual,
    BinopGreaterThanOrEqual,
    AssignPlus,
    AssignDifference,
    AssignProduct,
    AssignQuotient,
    AssignRemainder,
    AssignBitAnd,
    AssignBitOr,
    AssignBitXor,
    StructOpPointer,

    CommentSingleLine,
    CommentMultiLineStart,
    CommentMultiLineEnd,

    ParenthesisOpen,
    ParenthesisClose,
    BraceOpen,
    BraceClose,
    BracketsOpen,
    BracketsClose,
    Semicolon,
    UnopComplement,
    UnopNegation,
    UnopNot,
    BinopAddition,
    BinopMultiplication,
    BinopDivision,
    BinopRemainder,
    BinopBitAnd,
    BinopBitOr,
    BinopBitXor,
    BinopLessThan,
    BinopGreaterThan,
    AssignSimple,
    TernaryIf,
    TernaryElse,
    SeparatorComma,
    StructOpMember,

    IncludeDirective,
    PreprocessorDirective,

    KeyChar,
    KeyInt,
    KeyLong,
    KeyDouble,
    KeySigned,
    KeyUnsigned,
    KeyVoid,
    KeyStruct,
    KeySizeof,
    KeyReturn,
    KeyIf,
    KeyElse,
    KeyGoto,
    KeyDo,
    KeyWhile,
    KeyFor,
    KeyBreak,
    KeyContinue,
    KeyStatic,
    KeyExtern,

    Identifier,
    StringLiteral,
    CharConstant,
    FloatConstant,
    UnsignedLongConstant,
    UnsignedConstant,
    LongConstant,
    Constant,

    Skip,
    Error,
}

/// Shared between the `FloatConstant` table entry and the leading-dot
/// fallback match used when a `.` is immediately followed by a digit (see
/// `LexerContext::tokenize_file`): a `.` token must never consume the digits
/// after it, so the leading-dot float literal is matched separately, anchored
/// at the same starting position, once `StructOpMember` has already claimed
/// the bare `.`.
const FLOAT_PATTERN: &str = r"(?:(?:[0-9]*\.[0-9]+|[0-9]+\.?)[Ee][+-]?[0-9]+|[0-9]*\.[0-9]+|[0-9]+\.)";

/// Declared in the exact order the original lexer declares `TOKEN_REGEXPS`:
/// longest multi-character operators first, then punctuation, then
/// comment/preprocessor markers, then keywords, then identifier/literal
/// patterns, and finally whitespace/catch-all last.
const TOKEN_TABLE: &[(TokenKind, &str)] = &[
    (TokenKind::AssignBitshiftLeft, r"<<="),
    (TokenKind::AssignBitshiftRight, r">>="),
    (TokenKind::UnopDecrement, r"--"),
    (TokenKind::BinopBitshiftLeft, r"<<"),
    (TokenKind::BinopBitshiftRight, r">>"),
    (TokenKind::BinopAnd, r"&&"),
    (TokenKind::BinopOr, r"\|\|"),
    (TokenKind::BinopEqualTo, r"=="),
    (TokenKind::BinopNotEqual, r"!="),
    (TokenKind::BinopLessThanOrEqual, r"<="),
    (TokenKind::BinopGreaterThanOrEqual, r">="),
    (TokenKind::AssignPlus, r"\+="),
    (TokenKind::AssignDifference, r"-="),
    (TokenKind::AssignProduct, r"\*="),
    (TokenKind::AssignQuotient, r"/="),
    (TokenKind::AssignRemainder, r"%="),
    (TokenKind::AssignBitAnd, r"&="),
    (TokenKind::AssignBitOr, r"\|="),
    (TokenKind::AssignBitXor, r"\^="),
    (TokenKind::StructOpPointer, r"->"),
    (TokenKind::CommentSingleLine, r"//"),
    (TokenKind::CommentMultiLineStart, r"/\*"),
    (TokenKind::CommentMultiLineEnd, r"\*/"),
    (TokenKind::ParenthesisOpen, r"\("),
    (TokenKind::ParenthesisClose, r"\)"),
    (TokenKind::BraceOpen, r"\{"),
    (TokenKind::BraceClose, r"\}"),
    (TokenKind::BracketsOpen, r"\["),
    (TokenKind::BracketsClose, r"\]"),
    (TokenKind::Semicolon, r";"),
    (TokenKind::UnopComplement, r"~"),
    (TokenKind::UnopNegation, r"-"),
    (TokenKind::UnopNot, r"!"),
    (TokenKind::BinopAddition, r"\+"),
    (TokenKind::BinopMultiplication, r"\*"),
    (TokenKind::BinopDivision, r"/"),
    (TokenKind::BinopRemainder, r"%"),
    (TokenKind::BinopBitAnd, r"&"),
    (TokenKind::BinopBitOr, r"\|"),
    (TokenKind::BinopBitXor, r"\^"),
    (TokenKind::BinopLessThan, r"<"),
    (TokenKind::BinopGreaterThan, r">"),
    (TokenKind::AssignSimple, r"="),
    (TokenKind::TernaryIf, r"\?"),
    (TokenKind::TernaryElse, r":"),
    (TokenKind::SeparatorComma, r","),
    (TokenKind::StructOpMember, r"\."),
    (
        TokenKind::IncludeDirective,
        r#"^\s*#\s*include\b\s*(?:<[^/]+(?:/[^/]+)*\.h>|"[^/]+(?:/[^/]+)*\.h")"#,
    ),
    (TokenKind::PreprocessorDirective, r"^\s*#\s*[_a-zA-Z]+\b"),
    (TokenKind::KeyChar, r"char\b"),
    (TokenKind::KeyInt, r"int\b"),
    (TokenKind::KeyLong, r"long\b"),
    (TokenKind::KeyDouble, r"double\b"),
    (TokenKind::KeySigned, r"signed\b"),
    (TokenKind::KeyUnsigned, r"unsigned\b"),
    (TokenKind::KeyVoid, r"void\b"),
    (TokenKind::KeyStruct, r"struct\b"),
    (TokenKind::KeySizeof, r"sizeof\b"),
    (TokenKind::KeyReturn, r"return\b"),
    (TokenKind::KeyIf, r"if\b"),
    (TokenKind::KeyElse, r"else\b"),
    (TokenKind::KeyGoto, r"goto\b"),
    (TokenKind::KeyDo, r"do\b"),
    (TokenKind::KeyWhile, r"while\b"),
    (TokenKind::KeyFor, r"for\b"),
    (TokenKind::KeyBreak, r"break\b"),
    (TokenKind::KeyContinue, r"continue\b"),
    (TokenKind::KeyStatic, r"static\b"),
    (TokenKind::KeyExtern, r"extern\b"),
    (TokenKind::Identifier, r"[a-zA-Z_]\w*\b"),
    (TokenKind::StringLiteral, r#""(?:[^"\\\n]|\\['"\\?abfnrtv])*""#),
    (TokenKind::CharConstant, r"'(?:[^'\\\n]|\\['\"?\\abfnrtv])'"),
    (TokenKind::FloatConstant, FLOAT_PATTERN),
    (TokenKind::UnsignedLongConstant, r"[0-9]+(?:[lL][uU]|[uU][lL])"),
    (TokenKind::UnsignedConstant, r"[0-9]+[uU]"),
    (TokenKind::LongConstant, r"[0-9]+[lL]"),
    (TokenKind::Constant, r"[0-9]+"),
    (TokenKind::Skip, r"[ \n\r\t\f\v]"),
    (TokenKind::Error, r"."),
];

/// Resolved token, the parser's unit of input.
#[derive(Debug, Clone)]
pub struct Token {
    pub text: String,
    pub kind: TokenKind,
    pub total_line_number: usize,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl PartialEq<&str> for Token {
    fn eq(&self, other: &&str) -> bool {
        self.text == *other
    }
}

fn build_pattern() -> Regex {
    let mut pattern = String::new();
    for (i, (_, regexp)) in TOKEN_TABLE.iter().enumerate() {
        if i > 0 {
            pattern.push('|');
        }
        pattern.push_str(&format!("(?P<g{i}>{regexp})"));
    }
    Regex::new(&pattern).expect("static token table must compile")
}

/// Anchored at the start of the remaining input, used only for the
/// leading-dot float fallback (`.5`, `.5e3`) once `StructOpMember` has
/// matched a bare `.` that turns out to be followed by a digit.
fn build_leading_dot_float_pattern() -> Regex {
    Regex::new(&format!("^{FLOAT_PATTERN}")).expect("float pattern must compile anchored")
}

fn stdlib_dirs() -> Vec<PathBuf> {
    if cfg!(unix) {
        vec![PathBuf::from("/usr/include/"), PathBuf::from("/usr/local/include/")]
    } else {
        Vec::new()
    }
}

fn find_header(dirs: &[PathBuf], filename: &str) -> Option<PathBuf> {
    dirs.iter().map(|d| d.join(filename)).find(|p| p.exists())
}

struct LexerContext<'a> {
    pattern: Regex,
    leading_dot_float: Regex,
    include_dirs: &'a [PathBuf],
    stdlib_dirs: Vec<PathBuf>,
    included: HashSet<String>,
    tokens: Vec<Token>,
    source_map: SourceMap,
    total_line_number: usize,
}

impl<'a> LexerContext<'a> {
    fn tokenize_file(&mut self, path: &Path) -> Result<(), CompileError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|_| CompileError::new(path, 0, format!("cannot read source file {}", path.display())))?;

        let mut in_comment = false;
        for (line_idx, line) in contents.lines().enumerate() {
            let line_number = line_idx + 1;
            self.total_line_number += 1;

            let mut pos = 0usize;
            while pos < line.len() {
                let m = self
                    .pattern
                    .captures_at(line, pos)
                    .expect("catch-all Error alternative always matches at the current position");

                let (group_idx, text) = TOKEN_TABLE
                    .iter()
                    .enumerate()
                    .rev()
                    .find_map(|(i, _)| {
                        m.name(&format!("g{i}"))
                            .filter(|mm| mm.start() == pos)
                            .map(|mm| (i, mm.as_str().to_string()))
                    })
                    .expect("alternation must have exactly one named group matched at pos");

                let mut kind = TOKEN_TABLE[group_idx].0;
                let mut matched_text = text;
                let mut end = m.get(0).expect("overall match always present").end();

                // A bare `.` immediately followed by a digit is never struct-member
                // access: it's the start of a leading-dot float literal (`.5`,
                // `.5e3`). `StructOpMember` only ever matches the single `.` byte, so
                // recover the full float token here instead of letting the dot
                // shadow it.
                if kind == TokenKind::StructOpMember && line.as_bytes().get(end).is_some_and(u8::is_ascii_digit) {
                    let fm = self
                        .leading_dot_float
                        .find(&line[pos..])
                        .expect("a bare '.' followed by a digit is always a leading-dot float literal");
                    kind = TokenKind::FloatConstant;
                    matched_text = fm.as_str().to_string();
                    end = pos + fm.end();
                }

                // Integer-constant literals forbid a trailing identifier character or
                // `.` (so `1abc` doesn't silently tokenize as `1` followed by an
                // identifier): reject the whole token instead of truncating the match.
                if matches!(
                    kind,
                    TokenKind::Constant | TokenKind::LongConstant | TokenKind::UnsignedConstant | TokenKind::UnsignedLongConstant
                ) {
                    let forbidden = line.as_bytes().get(end).is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'.');
                    if forbidden {
                        return Err(CompileError::at(
                            &self.source_map,
                            self.total_line_number,
                            LexerError::InvalidToken(matched_text).to_string(),
                        ));
                    }
                }

                pos = end;

                if in_comment {
                    if kind == TokenKind::CommentMultiLineEnd {
                        in_comment = false;
                    }
                    continue;
                }

                match kind {
                    TokenKind::Error => {
                        return Err(CompileError::at(
                            &self.source_map,
                            self.total_line_number,
                            LexerError::InvalidToken(matched_text).to_string(),
                        ));
                    }
                    TokenKind::Skip => continue,
                    TokenKind::CommentMultiLineStart => {
                        in_comment = true;
                        continue;
                    }
                    TokenKind::IncludeDirective => {
                        self.tokenize_header(&matched_text, line_number)?;
                        continue;
                    }
                    TokenKind::CommentSingleLine | TokenKind::PreprocessorDirective => break,
                    _ => {}
                }

                self.tokens.push(Token {
                    text: matched_text,
                    kind,
                    total_line_number: self.total_line_number,
                });
            }
        }
        Ok(())
    }

    fn tokenize_header(&mut self, include_match: &str, line_number: usize) -> Result<(), CompileError> {
        let trimmed = include_match.trim();
        let (is_angled, mut filename) = if let Some(rest) = trimmed.strip_prefix('<') {
            (true, rest.trim_end_matches('>').to_string())
        } else {
            let inner = &trimmed[trimmed.find('"').map(|i| i + 1).unwrap_or(0)..];
            (false, inner.trim_end_matches('"').to_string())
        };

        if self.included.contains(&filename) {
            return Ok(());
        }
        self.included.insert(filename.clone());

        let resolved = if is_angled {
            find_header(&self.stdlib_dirs, &filename).or_else(|| find_header(self.include_dirs, &filename))
        } else {
            find_header(self.include_dirs, &filename)
        };

        let resolved = resolved.ok_or_else(|| {
            CompileError::at(
                &self.source_map,
                self.total_line_number,
                LexerError::FailedToIncludeHeaderFile(std::mem::take(&mut filename)).to_string(),
            )
        })?;

        self.source_map.push(1, self.total_line_number + 1, resolved.clone());
        self.tokenize_file(&resolved)?;
        self.source_map
            .push(line_number + 1, self.total_line_number + 1, resolved);
        Ok(())
    }
}

/// Lex `path`, resolving `#include` directives against `include_dirs` (for
/// quoted includes) and the baked-in standard-library search paths followed by
/// `include_dirs` (for angle-bracket includes). Returns the flattened token
/// stream and the source map needed to resolve later diagnostics.
pub fn lex(path: &Path, include_dirs: &[PathBuf]) -> Result<(Vec<Token>, SourceMap), CompileError> {
    let mut source_map = SourceMap::new();
    source_map.push(1, 1, path.to_path_buf());

    let mut ctx = LexerContext {
        pattern: build_pattern(),
        leading_dot_float: build_leading_dot_float_pattern(),
        include_dirs,
        stdlib_dirs: stdlib_dirs(),
        included: HashSet::new(),
        tokens: Vec::new(),
        source_map,
        total_line_number: 0,
    };

    ctx.tokenize_file(path)?;
    Ok((ctx.tokens, ctx.source_map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn lex_str(src: &str) -> Vec<Token> {
        let mut f = tempfile::Builder::new().suffix(".c").tempfile().unwrap();
        f.write_all(src.as_bytes()).unwrap();
        let (tokens, _) = lex(f.path(), &[]).unwrap();
        tokens
    }

    #[test]
    fn longest_match_wins_for_compound_assignment() {
        let tokens = lex_str("x <<= 1;");
        assert_eq!(tokens[1].kind, TokenKind::AssignBitshiftLeft);
    }

    #[test]
    fn shift_not_confused_with_relational() {
        let tokens = lex_str("x << 1;");
        assert_eq!(tokens[1].kind, TokenKind::BinopBitshiftLeft);
    }

    #[test]
    fn decrement_precedes_minus() {
        let tokens = lex_str("x--;");
        assert_eq!(tokens[1].kind, TokenKind::UnopDecrement);
    }

    #[test]
    fn keyword_not_matched_as_identifier_prefix() {
        let tokens = lex_str("int x;");
        assert_eq!(tokens[0].kind, TokenKind::KeyInt);
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
    }

    #[test]
    fn identifier_with_keyword_prefix_is_identifier() {
        let tokens = lex_str("int intValue;");
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].text, "intValue");
    }

    #[test]
    fn unsigned_long_suffix_forms() {
        for text in ["1UL", "1LU", "1ul", "1lu"] {
            let tokens = lex_str(&format!("{text};"));
            assert_eq!(tokens[0].kind, TokenKind::UnsignedLongConstant, "{text}");
        }
    }

    #[test]
    fn single_line_comment_truncates_rest_of_line() {
        let tokens = lex_str("x; // y;\nz;");
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[2].text, "z");
    }

    #[test]
    fn block_comment_spans_lines() {
        let tokens = lex_str("x; /* comment\nspanning lines */ y;");
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[2].text, "y");
    }

    #[test]
    fn invalid_character_is_an_error() {
        let err = {
            let mut f = tempfile::Builder::new().suffix(".c").tempfile().unwrap();
            f.write_all(b"int x = 1 @ 2;").unwrap();
            lex(f.path(), &[])
        };
        assert!(err.is_err());
    }

    #[test]
    fn member_access_dot_not_confused_with_float() {
        let tokens = lex_str("s.field;");
        assert_eq!(tokens[1].kind, TokenKind::StructOpMember);
    }

    #[test]
    fn leading_dot_float_is_not_a_struct_member_dot() {
        let tokens = lex_str("double d = .5;");
        assert_eq!(tokens[3].kind, TokenKind::FloatConstant);
        assert_eq!(tokens[3].text, ".5");
    }

    #[test]
    fn leading_dot_float_with_exponent() {
        let tokens = lex_str("double d = .5e3;");
        assert_eq!(tokens[3].kind, TokenKind::FloatConstant);
        assert_eq!(tokens[3].text, ".5e3");
    }

    #[test]
    fn integer_constant_followed_by_identifier_char_is_invalid() {
        let mut f = tempfile::Builder::new().suffix(".c").tempfile().unwrap();
        f.write_all(b"int x = 1abc;").unwrap();
        assert!(lex(f.path(), &[]).is_err());
    }

    #[test]
    fn unsigned_constant_followed_by_identifier_char_is_invalid() {
        let mut f = tempfile::Builder::new().suffix(".c").tempfile().unwrap();
        f.write_all(b"int x = 1uu;").unwrap();
        assert!(lex(f.path(), &[]).is_err());
    }
}
