//! Bracket tokenizer for `where` expressions.
//!
//! ```text
//! price[>=][5],some:[price[<][100],discount[>=][0.5]]
//! ```
//!
//! splits into text fragments, commas and bracketed groups. A backslash escapes the next
//! character, so `\[`, `\]`, `\,` and `\\` are taken literally.

use super::error::QueryStringError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Text(String),
    Comma,
    Group(Vec<Token>),
}

impl Token {
    /// Renders the token back to text, escapes resolved.
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Comma => ",".to_string(),
            Self::Group(inner) => format!("[{}]", render_all(inner)),
        }
    }
}

pub fn render_all(tokens: &[Token]) -> String {
    tokens.iter().map(Token::render).collect()
}

struct Tokenizer {
    chars: Vec<char>,
    pos: usize,
}

impl Tokenizer {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn sequence(&mut self, depth: usize) -> Result<Vec<Token>, QueryStringError> {
        let mut tokens = Vec::new();
        let mut text = String::new();

        while let Some(c) = self.next_char() {
            match c {
                '\\' => text.push(self.next_char().unwrap_or('\\')),
                ',' => {
                    flush(&mut text, &mut tokens);
                    tokens.push(Token::Comma);
                }
                '[' => {
                    flush(&mut text, &mut tokens);
                    let inner = self.sequence(depth + 1)?;
                    tokens.push(Token::Group(inner));
                }
                ']' if depth == 0 => {
                    return Err(QueryStringError::malformed(format!(
                        "unexpected ']' at position {}",
                        self.pos
                    )));
                }
                ']' => {
                    flush(&mut text, &mut tokens);
                    return Ok(tokens);
                }
                other => text.push(other),
            }
        }

        if depth > 0 {
            return Err(QueryStringError::malformed("unclosed '['"));
        }
        flush(&mut text, &mut tokens);
        Ok(tokens)
    }
}

fn flush(text: &mut String, tokens: &mut Vec<Token>) {
    if !text.trim().is_empty() {
        tokens.push(Token::Text(std::mem::take(text)));
    } else {
        text.clear();
    }
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, QueryStringError> {
    Tokenizer::new(input).sequence(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Token {
        Token::Text(s.to_string())
    }

    #[test]
    fn test_tokenize_condition() {
        let tokens = tokenize("price[>=][5]").unwrap();
        assert_eq!(
            tokens,
            vec![
                text("price"),
                Token::Group(vec![text(">=")]),
                Token::Group(vec![text("5")]),
            ]
        );
    }

    #[test]
    fn test_tokenize_nested_groups_and_commas() {
        let tokens = tokenize("some:[a[=][1],b[in][1,2]]").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0], text("some:"));
        let Token::Group(inner) = &tokens[1] else {
            panic!("expected group");
        };
        assert_eq!(inner[3], Token::Comma);
        assert_eq!(
            inner[6],
            Token::Group(vec![text("1"), Token::Comma, text("2")])
        );
    }

    #[test]
    fn test_escapes_are_literal() {
        let tokens = tokenize(r"name[=][a\,b\]\\]").unwrap();
        assert_eq!(tokens[2], Token::Group(vec![text(r"a,b]\")]));
    }

    #[test]
    fn test_unbalanced_brackets() {
        assert!(matches!(
            tokenize("price[>=][5"),
            Err(QueryStringError::MalformedToken { .. })
        ));
        assert!(matches!(
            tokenize("price]"),
            Err(QueryStringError::MalformedToken { .. })
        ));
    }

    #[test]
    fn test_empty_group() {
        assert_eq!(
            tokenize("id[in][]").unwrap()[2],
            Token::Group(Vec::new())
        );
    }
}
