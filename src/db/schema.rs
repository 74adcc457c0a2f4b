pub const SCHEMA: &str = r#"
-- posts table (post_id comes from the feed, never generated here)
CREATE TABLE IF NOT EXISTS posts (
    post_id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    summary TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL DEFAULT '',
    creator TEXT NOT NULL DEFAULT '',
    pub_date TEXT NOT NULL,
    push_status INTEGER NOT NULL DEFAULT 0,
    matched_subscription_id INTEGER,
    delivered_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_posts_push_status ON posts(push_status);
CREATE INDEX IF NOT EXISTS idx_posts_pub_date ON posts(pub_date DESC);

-- subscriptions table
CREATE TABLE IF NOT EXISTS subscriptions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    keyword1 TEXT,
    keyword2 TEXT,
    keyword3 TEXT,
    creator TEXT,
    category TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- settings table (exactly one row)
CREATE TABLE IF NOT EXISTS settings (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    only_title INTEGER NOT NULL DEFAULT 0,
    stop_push INTEGER NOT NULL DEFAULT 0,
    bound_chat_id TEXT,
    bot_token TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

INSERT OR IGNORE INTO settings (id) VALUES (1);
"#;
