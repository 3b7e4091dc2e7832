// query/builder.rs - 引擎查询构建器
//! 将编译后的 `QueryTree` 转换为 tantivy 查询
//!
//! 得分约定: text / fuzzy / phrase / prefix 使用引擎得分；
//! term_match、范围查询和 all 的得分恒为 1.0。

use std::ops::Bound;

use tantivy::query::{
    AllQuery, BooleanQuery, ConstScoreQuery, EmptyQuery, FuzzyTermQuery, Occur, PhraseQuery,
    Query, QueryParser as TantivyQueryParser, RangeQuery, RegexQuery, TermQuery,
};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::tokenizer::{Token, TokenStream};
use tantivy::{Index, Term};

use super::QueryError;
use super::types::*;

/// 非排序类查询的固定得分
pub const CONSTANT_SCORE: f32 = 1.0;

/// 查询构建器
pub struct QueryBuilder<'a> {
    index: &'a Index,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(index: &'a Index) -> Self {
        Self { index }
    }

    pub fn build(&self, tree: &QueryTree) -> Result<Box<dyn Query>, QueryError> {
        match tree {
            QueryTree::Text { query, fields } => {
                let parser = TantivyQueryParser::for_index(self.index, fields.clone());
                parser.parse_query(query).map_err(|e| QueryError::Parse(e.to_string()))
            }
            QueryTree::Fuzzy { words, fields } => Ok(self.build_fuzzy(words, fields)),
            QueryTree::Phrase { phrase, fields } => self.build_phrase(phrase, fields),
            QueryTree::Prefix { clauses } => self.build_prefix(clauses),
            QueryTree::TermMatch { field, value } => {
                let term = match value {
                    TermValue::Text(s) => Term::from_field_text(*field, s),
                    TermValue::I64(n) => Term::from_field_i64(*field, *n),
                    TermValue::F64(n) => Term::from_field_f64(*field, *n),
                };
                let query = TermQuery::new(term, IndexRecordOption::Basic);
                Ok(Box::new(ConstScoreQuery::new(Box::new(query), CONSTANT_SCORE)))
            }
            QueryTree::RangeI64 { field, min, max } => {
                let lower = Term::from_field_i64(*field, min.unwrap_or(i64::MIN));
                let upper = Term::from_field_i64(*field, max.unwrap_or(i64::MAX));
                Ok(Box::new(RangeQuery::new(Bound::Included(lower), Bound::Included(upper))))
            }
            QueryTree::RangeF64 { field, min, max } => {
                let lower = Term::from_field_f64(*field, min.unwrap_or(f64::NEG_INFINITY));
                let upper = Term::from_field_f64(*field, max.unwrap_or(f64::INFINITY));
                Ok(Box::new(RangeQuery::new(Bound::Included(lower), Bound::Included(upper))))
            }
            QueryTree::Bool { must, should, must_not } => {
                let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
                for sub in must {
                    clauses.push((Occur::Must, self.build(sub)?));
                }
                for sub in should {
                    clauses.push((Occur::Should, self.build(sub)?));
                }
                for sub in must_not {
                    clauses.push((Occur::MustNot, self.build(sub)?));
                }
                // 只有排除条件时，从全部文档中排除
                if must.is_empty() && should.is_empty() {
                    clauses.push((Occur::Must, Box::new(AllQuery)));
                }
                Ok(Box::new(BooleanQuery::new(clauses)))
            }
            QueryTree::All => Ok(Box::new(AllQuery)),
            QueryTree::Nothing => Ok(Box::new(EmptyQuery)),
        }
    }

    /// 每个词都必须命中（Must），同一个词在任一字段命中即可（Should）
    fn build_fuzzy(&self, words: &[FuzzyWord], fields: &[Field]) -> Box<dyn Query> {
        let word_clauses: Vec<(Occur, Box<dyn Query>)> = words
            .iter()
            .map(|word| {
                let per_field: Vec<(Occur, Box<dyn Query>)> = fields
                    .iter()
                    .map(|field| {
                        let term = Term::from_field_text(*field, &word.text);
                        let query: Box<dyn Query> =
                            Box::new(FuzzyTermQuery::new(term, word.distance, true));
                        (Occur::Should, query)
                    })
                    .collect();
                let query: Box<dyn Query> = Box::new(BooleanQuery::new(per_field));
                (Occur::Must, query)
            })
            .collect();
        Box::new(BooleanQuery::new(word_clauses))
    }

    /// 使用字段自身的分词器切分短语，保证与索引时一致
    fn build_phrase(&self, phrase: &str, fields: &[Field]) -> Result<Box<dyn Query>, QueryError> {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for field in fields {
            let mut analyzer = self
                .index
                .tokenizer_for_field(*field)
                .map_err(|e| QueryError::Parse(e.to_string()))?;

            let mut terms: Vec<(usize, Term)> = Vec::new();
            let mut stream = analyzer.token_stream(phrase);
            stream.process(&mut |token: &Token| {
                terms.push((token.position, Term::from_field_text(*field, &token.text)));
            });

            let query: Box<dyn Query> = match terms.len() {
                0 => continue,
                1 => {
                    let (_, term) = terms.remove(0);
                    Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs))
                }
                _ => Box::new(PhraseQuery::new_with_offset(terms)),
            };
            clauses.push((Occur::Should, query));
        }

        if clauses.is_empty() {
            return Ok(Box::new(EmptyQuery));
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    fn build_prefix(&self, clauses: &[PrefixClause]) -> Result<Box<dyn Query>, QueryError> {
        let queries = clauses
            .iter()
            .map(|clause| {
                let pattern = format!("{}.*", regex::escape(&clause.prefix));
                let query = RegexQuery::from_pattern(&pattern, clause.field)
                    .map_err(|e| QueryError::Parse(e.to_string()))?;
                Ok((Occur::Should, Box::new(query) as Box<dyn Query>))
            })
            .collect::<Result<Vec<_>, QueryError>>()?;
        Ok(Box::new(BooleanQuery::new(queries)))
    }
}
