//! Query-string DSL.
//!
//! ```text
//! ?select=name,price&where=price[>=][5],some:[price[<][100],discount[>=][0.5]]
//!     &search=desk lamp&order=:default,price:desc&page=2&perPage=20&populate
//! ```
//!
//! [`compile_query_string`] turns decoded pairs into [`QueryStringParams`] plus a list of
//! [`QueryStringError`]s. Builders apply the params with `apply_query_string_params`.

mod compile;
mod error;
mod parser;
mod tokenizer;

pub use compile::{
    CompiledQuery, QueryStringContext, QueryStringParams, compile_query_string,
    parse_direction, parse_query_pairs,
};
pub use error::QueryStringError;
pub use parser::WhereParser;
pub use tokenizer::{Token, tokenize};
