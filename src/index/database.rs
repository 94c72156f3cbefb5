//! Database operations for the catalog index

use std::collections::HashMap;

use crate::config::EMBEDDING_DIMENSIONS;
use crate::index::error::DbError;
use crate::index::{EmbeddingRow, Merchant, Product, ProductRecord, schema, vector};
use chrono::Utc;
use libsql::{Connection, Row, Rows, params};
use tracing::{debug, instrument};

/// Row-level filter shared by the vector and lexical candidate queries.
///
/// All predicates are applied in SQL so both retrieval branches see the same
/// candidate universe. Price comparisons use the effective price at `now`,
/// with expired or future discounts ignored.
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    /// Restrict candidates to these merchants (empty means all)
    pub merchant_ids: Vec<i64>,

    /// Keep only products with an active discount
    pub only_discounted: bool,

    /// Keep only products whose effective price is at most this
    pub max_price: Option<f64>,

    /// Unix timestamp the discount windows are evaluated against
    pub now: i64,
}

impl CandidateFilter {
    /// Build the WHERE clause fragment and its parameters.
    ///
    /// The fragment starts with " AND" so it can be appended to a query that
    /// already has a "WHERE 1=1" anchor.
    fn to_sql(&self) -> (String, Vec<libsql::Value>) {
        let mut sql = String::new();
        let mut values: Vec<libsql::Value> = Vec::new();

        if !self.merchant_ids.is_empty() {
            let placeholders = vec!["?"; self.merchant_ids.len()].join(", ");
            sql.push_str(&format!(" AND p.merchant_id IN ({})", placeholders));
            for id in &self.merchant_ids {
                values.push((*id).into());
            }
        }

        if self.only_discounted {
            sql.push_str(
                " AND p.discount_price IS NOT NULL
                  AND p.discount_price < p.price
                  AND (p.discount_starts_at IS NULL OR p.discount_starts_at <= ?)
                  AND (p.discount_ends_at IS NULL OR p.discount_ends_at >= ?)",
            );
            values.push(self.now.into());
            values.push(self.now.into());
        }

        if let Some(max_price) = self.max_price {
            sql.push_str(
                " AND (CASE WHEN p.discount_price IS NOT NULL
                        AND (p.discount_starts_at IS NULL OR p.discount_starts_at <= ?)
                        AND (p.discount_ends_at IS NULL OR p.discount_ends_at >= ?)
                       THEN p.discount_price ELSE p.price END) <= ?",
            );
            values.push(self.now.into());
            values.push(self.now.into());
            values.push(max_price.into());
        }

        (sql, values)
    }
}

/// One product returned by the dense retrieval branch
#[derive(Debug, Clone)]
pub struct VectorHit {
    /// The matched product
    pub record: ProductRecord,

    /// Cosine similarity against the query vector
    pub score: f64,
}

const RECORD_COLUMNS: &str = "p.id, p.merchant_id, p.title, p.description, p.brand, p.category,
        p.size_value, p.size_unit, p.price, p.discount_price,
        p.discount_starts_at, p.discount_ends_at, p.enriched_description,
        m.name, m.city";

/// Database manager for the catalog index
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create a new database manager
    #[instrument(skip(conn))]
    pub async fn new(conn: Connection) -> Result<Self, DbError> {
        // Initialize schema
        schema::initialize_schema(&conn).await?;

        Ok(Self { conn })
    }

    /// Create a new database manager from a path
    pub async fn new_from_path(path: &str) -> Result<Self, DbError> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DbError::Connection(format!("Failed to open database: {}", e)))?;

        let conn = db
            .connect()
            .map_err(|e| DbError::Connection(format!("Failed to connect to database: {}", e)))?;

        Self::new(conn).await
    }

    /// Execute a custom query with parameters
    pub async fn execute_query<P>(&self, sql: &str, params: P) -> Result<Rows, DbError>
    where
        P: libsql::params::IntoParams,
    {
        self.conn
            .query(sql, params)
            .await
            .map_err(|e| DbError::Query(format!("Failed to execute query: {}", e)))
    }

    /// Insert or update a merchant
    pub async fn upsert_merchant(&self, merchant: &Merchant) -> Result<(), DbError> {
        self.conn
            .execute(
                "INSERT INTO merchants (id, name, city) VALUES (?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 city = excluded.city",
                params![merchant.id, merchant.name.clone(), merchant.city.clone()],
            )
            .await
            .map_err(|e| DbError::Query(format!("Failed to upsert merchant: {}", e)))?;

        Ok(())
    }

    /// Insert or update a product.
    ///
    /// The enriched description is owned by the refresh pipeline and is
    /// deliberately left untouched on update.
    pub async fn upsert_product(&self, product: &Product) -> Result<(), DbError> {
        let now = Utc::now().timestamp();

        self.conn
            .execute(
                "INSERT INTO products (id, merchant_id, title, description, brand, category,
                     size_value, size_unit, price, discount_price,
                     discount_starts_at, discount_ends_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                 merchant_id = excluded.merchant_id,
                 title = excluded.title,
                 description = excluded.description,
                 brand = excluded.brand,
                 category = excluded.category,
                 size_value = excluded.size_value,
                 size_unit = excluded.size_unit,
                 price = excluded.price,
                 discount_price = excluded.discount_price,
                 discount_starts_at = excluded.discount_starts_at,
                 discount_ends_at = excluded.discount_ends_at,
                 updated_at = excluded.updated_at",
                params![
                    product.id,
                    product.merchant_id,
                    product.title.clone(),
                    product.description.clone(),
                    product.brand.clone(),
                    product.category.clone(),
                    product.size_value,
                    product.size_unit.clone(),
                    product.price,
                    product.discount_price,
                    product.discount_starts_at,
                    product.discount_ends_at,
                    now,
                ],
            )
            .await
            .map_err(|e| DbError::Query(format!("Failed to upsert product: {}", e)))?;

        Ok(())
    }

    /// Get a product with its merchant by ID
    pub async fn get_product(&self, product_id: i64) -> Result<Option<ProductRecord>, DbError> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS}
                     FROM products p
                     JOIN merchants m ON m.id = p.merchant_id
                     WHERE p.id = ?"
                ),
                params![product_id],
            )
            .await
            .map_err(|e| DbError::Query(format!("Failed to get product: {}", e)))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DbError::Data(format!("Failed to get product: {}", e))),
        }
    }

    /// Get products with their merchants, in ID order.
    ///
    /// With `ids` set only those products are returned; unknown IDs are
    /// silently skipped.
    #[instrument(skip(self, ids))]
    pub async fn product_records(
        &self,
        ids: Option<&[i64]>,
    ) -> Result<Vec<ProductRecord>, DbError> {
        let mut sql = format!(
            "SELECT {RECORD_COLUMNS}
             FROM products p
             JOIN merchants m ON m.id = p.merchant_id"
        );

        let mut values: Vec<libsql::Value> = Vec::new();
        if let Some(ids) = ids {
            let placeholders = vec!["?"; ids.len()].join(", ");
            sql.push_str(&format!(" WHERE p.id IN ({})", placeholders));
            for id in ids {
                values.push((*id).into());
            }
        }
        sql.push_str(" ORDER BY p.id");

        let mut rows = self
            .conn
            .query(&sql, values)
            .await
            .map_err(|e| DbError::Query(format!("Failed to get products: {}", e)))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            records.push(row_to_record(&row)?);
        }

        Ok(records)
    }

    /// Store the generated description for a product
    pub async fn update_enriched_description(
        &self,
        product_id: i64,
        enriched: &str,
    ) -> Result<(), DbError> {
        self.conn
            .execute(
                "UPDATE products SET enriched_description = ? WHERE id = ?",
                params![enriched, product_id],
            )
            .await
            .map_err(|e| DbError::Query(format!("Failed to update enriched description: {}", e)))?;

        Ok(())
    }

    /// Get the stored embedding for a product
    pub async fn get_embedding_row(
        &self,
        product_id: i64,
    ) -> Result<Option<EmbeddingRow>, DbError> {
        let mut rows = self
            .conn
            .query(
                "SELECT product_id, embedding_text, model_version, content_hash, embedding,
                        created_at, updated_at
                 FROM product_embeddings
                 WHERE product_id = ?",
                params![product_id],
            )
            .await
            .map_err(|e| DbError::Query(format!("Failed to get embedding: {}", e)))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_embedding(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DbError::Data(format!("Failed to get embedding: {}", e))),
        }
    }

    /// Get (model_version, content_hash) for every embedded product.
    ///
    /// Used by the incremental refresh to decide which products changed
    /// without loading the vectors themselves.
    pub async fn embedding_fingerprints(
        &self,
    ) -> Result<HashMap<i64, (String, String)>, DbError> {
        let mut rows = self
            .conn
            .query(
                "SELECT product_id, model_version, content_hash FROM product_embeddings",
                params![],
            )
            .await
            .map_err(|e| DbError::Query(format!("Failed to get fingerprints: {}", e)))?;

        let mut fingerprints = HashMap::new();
        while let Ok(Some(row)) = rows.next().await {
            let product_id: i64 = row
                .get(0)
                .map_err(|e| DbError::Data(format!("Failed to get product_id: {}", e)))?;
            let model_version: String = row
                .get(1)
                .map_err(|e| DbError::Data(format!("Failed to get model_version: {}", e)))?;
            let content_hash: String = row
                .get(2)
                .map_err(|e| DbError::Data(format!("Failed to get content_hash: {}", e)))?;
            fingerprints.insert(product_id, (model_version, content_hash));
        }

        Ok(fingerprints)
    }

    /// Insert or replace the embedding for a product
    pub async fn upsert_embedding(
        &self,
        product_id: i64,
        embedding_text: &str,
        model_version: &str,
        content_hash: &str,
        embedding: &[f32],
    ) -> Result<(), DbError> {
        if embedding.len() != EMBEDDING_DIMENSIONS {
            return Err(DbError::Data(format!(
                "Embedding has {} dimensions, expected {}",
                embedding.len(),
                EMBEDDING_DIMENSIONS
            )));
        }

        let now = Utc::now().timestamp();
        let blob = vector::to_blob(embedding);

        let result = self
            .conn
            .execute(
                "INSERT INTO product_embeddings
                     (product_id, embedding_text, model_version, content_hash, embedding,
                      created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(product_id) DO UPDATE SET
                 embedding_text = excluded.embedding_text,
                 model_version = excluded.model_version,
                 content_hash = excluded.content_hash,
                 embedding = excluded.embedding,
                 updated_at = excluded.updated_at",
                params![
                    product_id,
                    embedding_text,
                    model_version,
                    content_hash,
                    libsql::Value::Blob(blob.clone()),
                    now,
                    now,
                ],
            )
            .await;

        // A concurrent writer can still race the upsert; one plain UPDATE
        // settles it either way
        if let Err(e) = result {
            if !e.to_string().to_lowercase().contains("constraint") {
                return Err(DbError::Query(format!("Failed to upsert embedding: {}", e)));
            }
            debug!("Embedding upsert for product {} hit a constraint, retrying as update", product_id);
            self.conn
                .execute(
                    "UPDATE product_embeddings
                     SET embedding_text = ?, model_version = ?, content_hash = ?,
                         embedding = ?, updated_at = ?
                     WHERE product_id = ?",
                    params![
                        embedding_text,
                        model_version,
                        content_hash,
                        libsql::Value::Blob(blob),
                        now,
                        product_id,
                    ],
                )
                .await
                .map_err(|e| DbError::Query(format!("Failed to update embedding: {}", e)))?;
        }

        Ok(())
    }

    /// Delete a product and its embedding
    pub async fn delete_product(&self, product_id: i64) -> Result<(), DbError> {
        self.conn
            .execute(
                "DELETE FROM product_embeddings WHERE product_id = ?",
                params![product_id],
            )
            .await
            .map_err(|e| DbError::Query(format!("Failed to delete embedding: {}", e)))?;

        self.conn
            .execute("DELETE FROM products WHERE id = ?", params![product_id])
            .await
            .map_err(|e| DbError::Query(format!("Failed to delete product: {}", e)))?;

        Ok(())
    }

    /// Dense candidate retrieval for one query vector.
    ///
    /// Tries the `vector_top_k` index first and falls back to an in-process
    /// scan when the index is unavailable. Either way the returned scores are
    /// exact cosine similarities, sorted descending and truncated to `limit`.
    #[instrument(skip(self, query_vector, filter))]
    pub async fn vector_candidates(
        &self,
        query_vector: &[f32],
        filter: &CandidateFilter,
        limit: usize,
    ) -> Result<Vec<VectorHit>, DbError> {
        let (filter_sql, filter_values) = filter.to_sql();

        let sql = format!(
            "SELECT {RECORD_COLUMNS}, e.embedding
             FROM vector_top_k('product_embeddings_idx', ?, ?) AS v
             JOIN product_embeddings e ON e.rowid = v.id
             JOIN products p ON p.id = e.product_id
             JOIN merchants m ON m.id = p.merchant_id
             WHERE 1=1{filter_sql}"
        );

        let mut values: Vec<libsql::Value> = Vec::new();
        values.push(libsql::Value::Blob(vector::to_blob(query_vector)));
        values.push((limit as i64).into());
        values.extend(filter_values);

        match self.conn.query(&sql, values).await {
            Ok(rows) => self.collect_hits(rows, query_vector, limit).await,
            Err(e) => {
                debug!("vector_top_k unavailable ({}), scanning embeddings instead", e);
                self.vector_scan(query_vector, filter, limit).await
            }
        }
    }

    /// Fallback dense retrieval without the vector index
    async fn vector_scan(
        &self,
        query_vector: &[f32],
        filter: &CandidateFilter,
        limit: usize,
    ) -> Result<Vec<VectorHit>, DbError> {
        let (filter_sql, filter_values) = filter.to_sql();

        let sql = format!(
            "SELECT {RECORD_COLUMNS}, e.embedding
             FROM product_embeddings e
             JOIN products p ON p.id = e.product_id
             JOIN merchants m ON m.id = p.merchant_id
             WHERE 1=1{filter_sql}"
        );

        let rows = self
            .conn
            .query(&sql, filter_values)
            .await
            .map_err(|e| DbError::Query(format!("Failed to scan embeddings: {}", e)))?;

        self.collect_hits(rows, query_vector, limit).await
    }

    async fn collect_hits(
        &self,
        mut rows: Rows,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorHit>, DbError> {
        let mut hits = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let record = row_to_record(&row)?;
            let blob: Vec<u8> = row
                .get(15)
                .map_err(|e| DbError::Data(format!("Failed to get embedding: {}", e)))?;
            let embedding = vector::from_blob(&blob);
            let score = vector::cosine_similarity(query_vector, &embedding);
            hits.push(VectorHit { record, score });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.product.id.cmp(&b.record.product.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Candidate rows for the lexical retrieval branch.
    ///
    /// Filtering happens in SQL; trigram scoring happens in process on the
    /// returned rows.
    #[instrument(skip(self, filter))]
    pub async fn lexical_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<ProductRecord>, DbError> {
        let (filter_sql, filter_values) = filter.to_sql();

        let sql = format!(
            "SELECT {RECORD_COLUMNS}
             FROM products p
             JOIN merchants m ON m.id = p.merchant_id
             WHERE 1=1{filter_sql}"
        );

        let mut rows = self
            .conn
            .query(&sql, filter_values)
            .await
            .map_err(|e| DbError::Query(format!("Failed to get lexical candidates: {}", e)))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            records.push(row_to_record(&row)?);
        }

        Ok(records)
    }
}

/// Convert a database row to a ProductRecord
fn row_to_record(row: &Row) -> Result<ProductRecord, DbError> {
    let product = Product {
        id: row
            .get(0)
            .map_err(|e| DbError::Data(format!("Failed to get id: {}", e)))?,
        merchant_id: row
            .get(1)
            .map_err(|e| DbError::Data(format!("Failed to get merchant_id: {}", e)))?,
        title: row
            .get(2)
            .map_err(|e| DbError::Data(format!("Failed to get title: {}", e)))?,
        description: row
            .get(3)
            .map_err(|e| DbError::Data(format!("Failed to get description: {}", e)))?,
        brand: row
            .get(4)
            .map_err(|e| DbError::Data(format!("Failed to get brand: {}", e)))?,
        category: row
            .get(5)
            .map_err(|e| DbError::Data(format!("Failed to get category: {}", e)))?,
        size_value: row
            .get(6)
            .map_err(|e| DbError::Data(format!("Failed to get size_value: {}", e)))?,
        size_unit: row
            .get(7)
            .map_err(|e| DbError::Data(format!("Failed to get size_unit: {}", e)))?,
        price: row
            .get(8)
            .map_err(|e| DbError::Data(format!("Failed to get price: {}", e)))?,
        discount_price: row
            .get(9)
            .map_err(|e| DbError::Data(format!("Failed to get discount_price: {}", e)))?,
        discount_starts_at: row
            .get(10)
            .map_err(|e| DbError::Data(format!("Failed to get discount_starts_at: {}", e)))?,
        discount_ends_at: row
            .get(11)
            .map_err(|e| DbError::Data(format!("Failed to get discount_ends_at: {}", e)))?,
        enriched_description: row
            .get(12)
            .map_err(|e| DbError::Data(format!("Failed to get enriched_description: {}", e)))?,
    };

    Ok(ProductRecord {
        product,
        merchant_name: row
            .get(13)
            .map_err(|e| DbError::Data(format!("Failed to get merchant name: {}", e)))?,
        merchant_city: row
            .get(14)
            .map_err(|e| DbError::Data(format!("Failed to get merchant city: {}", e)))?,
    })
}

/// Convert a database row to an EmbeddingRow
fn row_to_embedding(row: &Row) -> Result<EmbeddingRow, DbError> {
    let blob: Vec<u8> = row
        .get(4)
        .map_err(|e| DbError::Data(format!("Failed to get embedding: {}", e)))?;

    Ok(EmbeddingRow {
        product_id: row
            .get(0)
            .map_err(|e| DbError::Data(format!("Failed to get product_id: {}", e)))?,
        embedding_text: row
            .get(1)
            .map_err(|e| DbError::Data(format!("Failed to get embedding_text: {}", e)))?,
        model_version: row
            .get(2)
            .map_err(|e| DbError::Data(format!("Failed to get model_version: {}", e)))?,
        content_hash: row
            .get(3)
            .map_err(|e| DbError::Data(format!("Failed to get content_hash: {}", e)))?,
        embedding: vector::from_blob(&blob),
        created_at: row
            .get(5)
            .map_err(|e| DbError::Data(format!("Failed to get created_at: {}", e)))?,
        updated_at: row
            .get(6)
            .map_err(|e| DbError::Data(format!("Failed to get updated_at: {}", e)))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    async fn setup_test_db() -> (Database, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();

        let db = Database::new_from_path(&db_path).await.unwrap();
        (db, temp_dir)
    }

    fn merchant(id: i64, name: &str, city: Option<&str>) -> Merchant {
        Merchant {
            id,
            name: name.to_string(),
            city: city.map(str::to_string),
        }
    }

    fn product(id: i64, merchant_id: i64, title: &str, price: f64) -> Product {
        Product {
            id,
            merchant_id,
            title: title.to_string(),
            description: None,
            brand: None,
            category: None,
            size_value: None,
            size_unit: None,
            price,
            discount_price: None,
            discount_starts_at: None,
            discount_ends_at: None,
            enriched_description: None,
        }
    }

    fn unit_vector(index: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIMENSIONS];
        v[index] = 1.0;
        v
    }

    async fn seed_merchant_and_products(db: &Database) {
        db.upsert_merchant(&merchant(1, "Bingo", Some("Sarajevo")))
            .await
            .unwrap();
        db.upsert_merchant(&merchant(2, "Konzum", Some("Mostar")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_database_initialization() {
        let (db, _temp_dir) = setup_test_db().await;

        let mut result = db
            .execute_query(
                "SELECT name FROM sqlite_master WHERE type='table'
                 AND name IN ('merchants', 'products', 'product_embeddings')",
                params![],
            )
            .await
            .unwrap();

        let mut tables = Vec::new();
        while let Ok(Some(row)) = result.next().await {
            let table_name: String = row.get(0).unwrap();
            tables.push(table_name);
        }

        assert_eq!(tables.len(), 3);
    }

    #[tokio::test]
    async fn test_upsert_and_get_product() {
        let (db, _temp_dir) = setup_test_db().await;
        seed_merchant_and_products(&db).await;

        db.upsert_product(&product(10, 1, "Kafa mljevena 500g", 8.90))
            .await
            .unwrap();

        let record = db.get_product(10).await.unwrap().unwrap();
        assert_eq!(record.product.title, "Kafa mljevena 500g");
        assert_eq!(record.merchant_name, "Bingo");
        assert_eq!(record.merchant_city.as_deref(), Some("Sarajevo"));

        // Update changes the price but not the identity
        let mut updated = product(10, 1, "Kafa mljevena 500g", 7.90);
        updated.brand = Some("Zlatna dzezva".to_string());
        db.upsert_product(&updated).await.unwrap();

        let record = db.get_product(10).await.unwrap().unwrap();
        assert_eq!(record.product.price, 7.90);
        assert_eq!(record.product.brand.as_deref(), Some("Zlatna dzezva"));
    }

    #[tokio::test]
    async fn test_product_upsert_preserves_enriched_description() {
        let (db, _temp_dir) = setup_test_db().await;
        seed_merchant_and_products(&db).await;

        db.upsert_product(&product(10, 1, "Mlijeko 1l", 2.50))
            .await
            .unwrap();
        db.update_enriched_description(10, "Mlijeko 1l od Bingo")
            .await
            .unwrap();

        db.upsert_product(&product(10, 1, "Mlijeko 1l", 2.40))
            .await
            .unwrap();

        let record = db.get_product(10).await.unwrap().unwrap();
        assert_eq!(
            record.product.enriched_description.as_deref(),
            Some("Mlijeko 1l od Bingo")
        );
    }

    #[tokio::test]
    async fn test_embedding_round_trip() {
        let (db, _temp_dir) = setup_test_db().await;
        seed_merchant_and_products(&db).await;
        db.upsert_product(&product(10, 1, "Kafa", 8.90)).await.unwrap();

        let embedding = unit_vector(3);
        db.upsert_embedding(10, "Kafa od Bingo", "text-embedding-3-small", "hash-a", &embedding)
            .await
            .unwrap();

        let row = db.get_embedding_row(10).await.unwrap().unwrap();
        assert_eq!(row.product_id, 10);
        assert_eq!(row.embedding_text, "Kafa od Bingo");
        assert_eq!(row.model_version, "text-embedding-3-small");
        assert_eq!(row.content_hash, "hash-a");
        assert_eq!(row.embedding, embedding);

        // Upsert replaces the existing row but keeps created_at
        let created_at = row.created_at;
        db.upsert_embedding(10, "Kafa od Bingo", "text-embedding-3-small", "hash-b", &unit_vector(4))
            .await
            .unwrap();
        let row = db.get_embedding_row(10).await.unwrap().unwrap();
        assert_eq!(row.content_hash, "hash-b");
        assert_eq!(row.created_at, created_at);

        let fingerprints = db.embedding_fingerprints().await.unwrap();
        assert_eq!(
            fingerprints.get(&10),
            Some(&(
                "text-embedding-3-small".to_string(),
                "hash-b".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_upsert_embedding_rejects_wrong_dimensions() {
        let (db, _temp_dir) = setup_test_db().await;
        seed_merchant_and_products(&db).await;
        db.upsert_product(&product(10, 1, "Kafa", 8.90)).await.unwrap();

        let result = db
            .upsert_embedding(10, "Kafa", "text-embedding-3-small", "hash", &[0.1, 0.2])
            .await;
        assert!(matches!(result, Err(DbError::Data(_))));
    }

    #[tokio::test]
    async fn test_vector_candidates_ranked_by_similarity() {
        let (db, _temp_dir) = setup_test_db().await;
        seed_merchant_and_products(&db).await;

        db.upsert_product(&product(1, 1, "Kafa", 8.90)).await.unwrap();
        db.upsert_product(&product(2, 2, "Mlijeko", 2.50)).await.unwrap();

        db.upsert_embedding(1, "text", "m", "h1", &unit_vector(0)).await.unwrap();
        db.upsert_embedding(2, "text", "m", "h2", &unit_vector(1)).await.unwrap();

        let filter = CandidateFilter {
            now: Utc::now().timestamp(),
            ..CandidateFilter::default()
        };
        let hits = db
            .vector_candidates(&unit_vector(0), &filter, 10)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.product.id, 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits[1].score.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_vector_candidates_respect_merchant_filter() {
        let (db, _temp_dir) = setup_test_db().await;
        seed_merchant_and_products(&db).await;

        db.upsert_product(&product(1, 1, "Kafa", 8.90)).await.unwrap();
        db.upsert_product(&product(2, 2, "Kafa druga", 9.90)).await.unwrap();

        db.upsert_embedding(1, "text", "m", "h1", &unit_vector(0)).await.unwrap();
        db.upsert_embedding(2, "text", "m", "h2", &unit_vector(0)).await.unwrap();

        let filter = CandidateFilter {
            merchant_ids: vec![2],
            now: Utc::now().timestamp(),
            ..CandidateFilter::default()
        };
        let hits = db
            .vector_candidates(&unit_vector(0), &filter, 10)
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.product.id, 2);
    }

    #[tokio::test]
    async fn test_lexical_candidates_discount_and_price_filters() {
        let (db, _temp_dir) = setup_test_db().await;
        seed_merchant_and_products(&db).await;

        let now = Utc::now().timestamp();

        // Active discount
        let mut active = product(1, 1, "Kafa", 10.0);
        active.discount_price = Some(6.0);
        active.discount_starts_at = Some(now - 100);
        active.discount_ends_at = Some(now + 100);
        db.upsert_product(&active).await.unwrap();

        // Expired discount
        let mut expired = product(2, 1, "Mlijeko", 10.0);
        expired.discount_price = Some(6.0);
        expired.discount_starts_at = Some(now - 200);
        expired.discount_ends_at = Some(now - 100);
        db.upsert_product(&expired).await.unwrap();

        // No discount
        db.upsert_product(&product(3, 1, "Hljeb", 2.0)).await.unwrap();

        let discounted = db
            .lexical_candidates(&CandidateFilter {
                only_discounted: true,
                now,
                ..CandidateFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(discounted.len(), 1);
        assert_eq!(discounted[0].product.id, 1);

        // Max price uses the effective price: the active discount (6.0)
        // qualifies while the expired one (back to 10.0) does not
        let affordable = db
            .lexical_candidates(&CandidateFilter {
                max_price: Some(7.0),
                now,
                ..CandidateFilter::default()
            })
            .await
            .unwrap();
        let ids: Vec<i64> = affordable.iter().map(|r| r.product.id).collect();
        assert!(ids.contains(&1));
        assert!(!ids.contains(&2));
        assert!(ids.contains(&3));
    }

    #[tokio::test]
    async fn test_delete_product_removes_embedding() {
        let (db, _temp_dir) = setup_test_db().await;
        seed_merchant_and_products(&db).await;

        db.upsert_product(&product(1, 1, "Kafa", 8.90)).await.unwrap();
        db.upsert_embedding(1, "text", "m", "h1", &unit_vector(0)).await.unwrap();

        db.delete_product(1).await.unwrap();

        assert!(db.get_product(1).await.unwrap().is_none());
        assert!(db.get_embedding_row(1).await.unwrap().is_none());
    }
}
