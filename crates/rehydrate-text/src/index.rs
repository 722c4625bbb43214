use std::path::PathBuf;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use rehydrate_core::error::{Error, Result};
use rehydrate_core::traits::TextIndexer;
use rehydrate_core::types::{Chunk, SearchHit, SourceKind};

use crate::tantivy_utils::{build_schema, register_tokenizer};

const WRITER_HEAP_BYTES: usize = 50_000_000;

fn text_err(e: impl std::fmt::Display) -> Error { Error::Search(format!("tantivy: {}", e)) }

/// BM25 index over chunk contents. Re-indexing a chunk id replaces it.
pub struct TantivyIndexer {
	index: Index,
	reader: IndexReader,
	id_field: Field,
	doc_id_field: Field,
	path_field: Field,
	text_field: Field,
}

impl TantivyIndexer {
	pub fn in_memory() -> Result<Self> { Self::from_index(Index::create_in_ram(build_schema())) }

	/// Create a fresh on-disk index, removing whatever was at `index_dir`.
	pub fn create_in_dir(index_dir: PathBuf) -> Result<Self> {
		if index_dir.exists() { std::fs::remove_dir_all(&index_dir).map_err(text_err)?; }
		std::fs::create_dir_all(&index_dir).map_err(text_err)?;
		let index = Index::create_in_dir(&index_dir, build_schema()).map_err(text_err)?;
		Self::from_index(index)
	}

	fn from_index(index: Index) -> Result<Self> {
		register_tokenizer(&index);
		let schema = index.schema();
		let id_field = schema.get_field("id").map_err(text_err)?;
		let doc_id_field = schema.get_field("doc_id").map_err(text_err)?;
		let path_field = schema.get_field("doc_path").map_err(text_err)?;
		let text_field = schema.get_field("text").map_err(text_err)?;
		let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into().map_err(text_err)?;
		Ok(Self { index, reader, id_field, doc_id_field, path_field, text_field })
	}

	pub fn num_docs(&self) -> u64 { self.reader.searcher().num_docs() }
}

impl TextIndexer for TantivyIndexer {
	fn index(&self, chunks: &[Chunk]) -> Result<()> {
		if chunks.is_empty() { return Ok(()); }
		let mut index_writer: IndexWriter = self.index.writer_with_num_threads(1, WRITER_HEAP_BYTES).map_err(text_err)?;
		for c in chunks {
			index_writer.delete_term(Term::from_field_text(self.id_field, &c.id));
			let doc = doc!(
				self.id_field => c.id.clone(),
				self.doc_id_field => c.document_id.clone(),
				self.path_field => c.file_path.clone(),
				self.text_field => c.content.clone(),
			);
			index_writer.add_document(doc).map_err(text_err)?;
		}
		index_writer.commit().map_err(text_err)?;
		self.reader.reload().map_err(text_err)?;
		tracing::debug!(chunks = chunks.len(), docs = self.num_docs(), "lexical index committed");
		Ok(())
	}

	fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
		if k == 0 || query.trim().is_empty() { return Ok(Vec::new()); }
		let searcher = self.reader.searcher();
		let qp = QueryParser::for_index(&self.index, vec![self.text_field]);
		// Free text from users: take what parses, ignore syntax errors.
		let (q, errors) = qp.parse_query_lenient(query);
		if !errors.is_empty() { tracing::debug!(errors = errors.len(), "lenient query parse dropped fragments"); }
		// Widen the window while the k-th score ties the last fetched doc.
		let mut limit = k;
		let top_docs = loop {
			let top = searcher.search(&q, &TopDocs::with_limit(limit)).map_err(text_err)?;
			let exhausted = top.len() < limit;
			let tail_tied = top.len() >= k && top.last().map(|t| t.0) == Some(top[k - 1].0);
			if exhausted || !tail_tied { break top; }
			limit = limit.saturating_mul(2);
		};
		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr).map_err(text_err)?;
			let id = doc.get_first(self.id_field).and_then(|v| v.as_str()).unwrap_or("").to_string();
			if id.is_empty() { continue; }
			hits.push(SearchHit { id, score, source: SourceKind::Lexical });
		}
		hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
		hits.truncate(k);
		Ok(hits)
	}
}
