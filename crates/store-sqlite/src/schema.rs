pub const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE documents (
  index_name      TEXT NOT NULL,
  doc_id          TEXT NOT NULL,
  version         INTEGER NOT NULL CHECK (version >= 1),
  body            TEXT NOT NULL,
  updated_ms      INTEGER NOT NULL,
  PRIMARY KEY (index_name, doc_id)
);

CREATE TABLE runs (
  run_id          TEXT PRIMARY KEY,
  started_at      INTEGER NOT NULL,
  finished_at     INTEGER,
  tool_version    TEXT NOT NULL,
  args_json       TEXT NOT NULL,
  total           INTEGER DEFAULT 0,
  success         INTEGER DEFAULT 0,
  failed          INTEGER DEFAULT 0,
  skipped         INTEGER DEFAULT 0,
  undelivered     INTEGER DEFAULT 0,
  merge_failures  INTEGER DEFAULT 0,
  error_count     INTEGER DEFAULT 0
);

CREATE TABLE errors (
  error_id        INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id          TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
  code            TEXT NOT NULL,
  url             TEXT NOT NULL,
  at_ms           INTEGER NOT NULL
);

CREATE INDEX idx_documents_updated ON documents(index_name, updated_ms);
CREATE INDEX idx_errors_run ON errors(run_id);
CREATE INDEX idx_errors_code ON errors(code);

COMMIT;
"#;
