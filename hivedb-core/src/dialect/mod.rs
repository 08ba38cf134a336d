//! Dialect translation - canonical (Postgres-flavored) DDL to SQLite
//!
//! The platform authors its schema in a Postgres-flavored canonical dialect.
//! The embedded engine has no UUID, JSON, array or timezone-aware timestamp
//! column types, so those are rewritten to TEXT, and 64-bit integers and
//! booleans collapse onto the engine's single wide INTEGER type. Identifiers
//! are generated in application code (`generate_id`) because the engine has
//! no server-side UUID generator.
//!
//! Every function here is pure: translating the same input twice yields
//! byte-identical output, and translated output is a fixed point of the
//! rewrite rules.

use regex::Regex;
use std::sync::LazyLock;

/// Canonical schema of the shared catalog database
pub const CANONICAL_CATALOG_SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS tenants (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    is_test BOOLEAN NOT NULL DEFAULT FALSE
);
CREATE INDEX IF NOT EXISTS idx_tenants_is_test ON tenants (is_test);
";

/// Canonical baseline schema applied to every tenant store
pub const CANONICAL_TENANT_SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS collections (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    name TEXT NOT NULL UNIQUE,
    schema JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ
);
CREATE TABLE IF NOT EXISTS documents (
    id UUID PRIMARY KEY,
    collection_id UUID NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    data JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ
);
CREATE TABLE IF NOT EXISTS users (
    id UUID PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT,
    verified BOOLEAN NOT NULL DEFAULT FALSE,
    metadata JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE TABLE IF NOT EXISTS files (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    mime_type TEXT,
    size_bytes BIGINT NOT NULL DEFAULT 0,
    tags TEXT[],
    uploaded_by UUID,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents (collection_id);
CREATE INDEX IF NOT EXISTS idx_users_email ON users (email);
";

/// Ordered rewrite rules. Array and default-stripping rules run before the
/// scalar type rules so `UUID[]` collapses in one pass.
static RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        // Identifiers are generated in application code instead.
        (r"(?i)\s+DEFAULT\s+gen_random_uuid\(\)", ""),
        (r"(?i)\bSERIAL\s+PRIMARY\s+KEY\b", "INTEGER PRIMARY KEY AUTOINCREMENT"),
        // Array columns of any element type serialize as JSON text.
        (r"(?i)\b[A-Za-z]+\s*\[\]", "TEXT"),
        (r"(?i)\bTIMESTAMP\s+WITH\s+TIME\s+ZONE\b", "TEXT"),
        (r"(?i)\bTIMESTAMPTZ\b", "TEXT"),
        (r"(?i)\bUUID\b", "TEXT"),
        (r"(?i)\bJSONB?\b", "TEXT"),
        (r"(?i)\bBIGINT\b", "INTEGER"),
        (r"(?i)\bDOUBLE\s+PRECISION\b", "REAL"),
        (r"(?i)\bBOOLEAN\b", "INTEGER"),
        (r"(?i)\bTRUE\b", "1"),
        (r"(?i)\bFALSE\b", "0"),
        (r"(?i)\bNOW\(\)", "(datetime('now'))"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).unwrap(), replacement))
    .collect()
});

static TABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?([A-Za-z_][A-Za-z0-9_]*)")
        .unwrap()
});

/// Translate canonical DDL into the embedded engine's dialect.
pub fn translate(canonical: &str) -> String {
    let mut out = canonical.to_string();
    for (pattern, replacement) in RULES.iter() {
        out = pattern.replace_all(&out, *replacement).into_owned();
    }
    out
}

/// Table names a schema defines, in definition order.
///
/// Used by the health monitor's schema-presence probe.
pub fn expected_tables(canonical: &str) -> Vec<String> {
    TABLE_NAME
        .captures_iter(canonical)
        .map(|c| c[1].to_string())
        .collect()
}

/// Generate a row/tenant identifier in canonical UUID textual form.
///
/// Identifiers are row keys, not credentials; v4 randomness gives
/// negligible collision probability at realistic tenant row counts.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
