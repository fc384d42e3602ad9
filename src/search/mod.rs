//! Retrieval: normalization, query parsing, keyword and semantic search,
//! fusion and the request pipeline that ties them together.

pub mod bm25;
pub mod fulltext;
pub mod hybrid;
pub mod keyword;
pub mod lookup;
pub mod normalize;
pub mod pipeline;
pub mod query;
pub mod semantic;
pub mod stats;
pub mod store;
pub mod vector;
