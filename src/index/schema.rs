//! # Database Schema Module
//!
//! This module defines and manages the database schema for the product
//! catalog and its embedding index.
//!
//! ## Schema Design
//!
//! The schema implements a three-table design:
//! 1. `merchants` - Merchant metadata
//! 2. `products` - The catalog itself, with pricing and discount windows
//! 3. `product_embeddings` - One embedding per product, keyed by product ID,
//!    stamped with the model version and a content hash for change detection
//!
//! The embedding column uses the libsql vector type so the `vector_top_k`
//! index can serve approximate nearest neighbor queries. When the vector
//! extension is unavailable the index is skipped and retrieval falls back to
//! an in-process scan.

use crate::config::EMBEDDING_DIMENSIONS;
use crate::index::error::DbError;
use libsql::{Connection, params};
use tracing::warn;

/// Initialize the database schema
pub async fn initialize_schema(conn: &Connection) -> Result<(), DbError> {
    // Create merchants table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS merchants (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            city TEXT
        )",
        params![],
    )
    .await
    .map_err(|e| DbError::Schema(format!("Failed to create merchants table: {}", e)))?;

    // Create products table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY,
            merchant_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            brand TEXT,
            category TEXT,
            size_value REAL,
            size_unit TEXT,
            price REAL NOT NULL,
            discount_price REAL,
            discount_starts_at INTEGER,
            discount_ends_at INTEGER,
            enriched_description TEXT,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (merchant_id) REFERENCES merchants(id) ON DELETE CASCADE
        )",
        params![],
    )
    .await
    .map_err(|e| DbError::Schema(format!("Failed to create products table: {}", e)))?;

    // Create embeddings table, one row per product
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS product_embeddings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id INTEGER NOT NULL UNIQUE,
                embedding_text TEXT NOT NULL,
                model_version TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                embedding F32_BLOB({}) NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (product_id) REFERENCES products(id) ON DELETE CASCADE
            )",
            EMBEDDING_DIMENSIONS
        ),
        params![],
    )
    .await
    .map_err(|e| DbError::Schema(format!("Failed to create product_embeddings table: {}", e)))?;

    // Create index on merchant_id for faster filtered lookups
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_products_merchant_id ON products(merchant_id)",
        params![],
    )
    .await
    .map_err(|e| DbError::Schema(format!("Failed to create index on products: {}", e)))?;

    // Create index on title for lexical candidate lookups
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_products_title ON products(title)",
        params![],
    )
    .await
    .map_err(|e| DbError::Schema(format!("Failed to create index on products title: {}", e)))?;

    // Create vector index for embeddings
    // This might fail if the vector extension is not available, but we'll continue anyway
    let vector_index_result = conn
        .execute(
            "CREATE INDEX IF NOT EXISTS product_embeddings_idx
             ON product_embeddings (libsql_vector_idx(embedding))",
            params![],
        )
        .await;

    if let Err(e) = vector_index_result {
        warn!(
            "Failed to create vector index: {}. Falling back to in-process similarity scans.",
            e
        );
    }

    Ok(())
}
