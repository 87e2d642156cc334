use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

use crate::model::{Channel, Message, MessageBody};

#[derive(sqlx::FromRow)]
struct ChannelRow {
    id: String,
    name: String,
    created_at: i64,
}

impl From<ChannelRow> for Channel {
    fn from(r: ChannelRow) -> Self {
        Self {
            id: r.id,
            name: r.name,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    channel_id: String,
    seq: i64,
    sender_id: String,
    sender_name: String,
    kind: String,
    content: String,
    created_at: i64,
}

impl TryFrom<MessageRow> for Message {
    type Error = sqlx::Error;

    fn try_from(r: MessageRow) -> Result<Self, Self::Error> {
        let body = match r.kind.as_str() {
            "text" => MessageBody::Text(r.content),
            "photo" => MessageBody::PhotoRef(r.content),
            other => return Err(sqlx::Error::Decode(format!("unknown message kind {other}").into())),
        };
        let seq = r.seq as u64;
        Ok(Self {
            id: crate::model::message_id(&r.channel_id, seq),
            seq,
            channel_id: r.channel_id,
            sender_id: r.sender_id,
            sender_name: r.sender_name,
            body,
            created_at: r.created_at,
        })
    }
}

fn split_body(body: &MessageBody) -> (&'static str, &str) {
    match body {
        MessageBody::Text(text) => ("text", text),
        MessageBody::PhotoRef(r) => ("photo", r),
    }
}

const MESSAGE_COLUMNS: &str = "channel_id,seq,sender_id,sender_name,kind,content,created_at";

/// Durable home of channels and messages.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn open(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS channels (
                position   INTEGER PRIMARY KEY AUTOINCREMENT,
                id         TEXT    NOT NULL UNIQUE,
                name       TEXT    NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                channel_id  TEXT    NOT NULL,
                seq         INTEGER NOT NULL,
                sender_id   TEXT    NOT NULL,
                sender_name TEXT    NOT NULL,
                kind        TEXT    NOT NULL,
                content     TEXT    NOT NULL,
                request_id  TEXT,
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (channel_id, seq)
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_request
             ON messages (channel_id, request_id) WHERE request_id IS NOT NULL",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    pub async fn insert_channel(&self, channel: &Channel) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO channels (id,name,created_at) VALUES (?,?,?)")
            .bind(&channel.id)
            .bind(&channel.name)
            .bind(channel.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn load_channels(&self) -> Result<Vec<Channel>, sqlx::Error> {
        let rows: Vec<ChannelRow> =
            sqlx::query_as("SELECT id,name,created_at FROM channels ORDER BY position")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Channel::from).collect())
    }

    pub async fn insert_message(&self, msg: &Message, request_id: Option<&str>) -> Result<(), sqlx::Error> {
        let (kind, content) = split_body(&msg.body);
        sqlx::query(
            "INSERT INTO messages (channel_id,seq,sender_id,sender_name,kind,content,request_id,created_at)
             VALUES (?,?,?,?,?,?,?,?)",
        )
        .bind(&msg.channel_id)
        .bind(msg.seq as i64)
        .bind(&msg.sender_id)
        .bind(&msg.sender_name)
        .bind(kind)
        .bind(content)
        .bind(request_id)
        .bind(msg.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn max_seq(&self, channel_id: &str) -> Result<u64, sqlx::Error> {
        let (max,): (Option<i64>,) = sqlx::query_as("SELECT MAX(seq) FROM messages WHERE channel_id=?")
            .bind(channel_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(max.unwrap_or(0) as u64)
    }

    pub async fn message(&self, channel_id: &str, seq: u64) -> Result<Option<Message>, sqlx::Error> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE channel_id=? AND seq=?"
        ))
        .bind(channel_id)
        .bind(seq as i64)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Message::try_from).transpose()
    }

    pub async fn message_by_request(&self, channel_id: &str, request_id: &str) -> Result<Option<Message>, sqlx::Error> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE channel_id=? AND request_id=?"
        ))
        .bind(channel_id)
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Message::try_from).transpose()
    }

    /// Newest `limit` messages, returned oldest first.
    pub async fn tail(&self, channel_id: &str, limit: usize) -> Result<Vec<Message>, sqlx::Error> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE channel_id=? ORDER BY seq DESC LIMIT ?"
        ))
        .bind(channel_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().rev().map(Message::try_from).collect()
    }

    pub async fn messages_after(&self, channel_id: &str, after_seq: u64, limit: usize) -> Result<Vec<Message>, sqlx::Error> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE channel_id=? AND seq>? ORDER BY seq LIMIT ?"
        ))
        .bind(channel_id)
        .bind(after_seq as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Message::try_from).collect()
    }

    pub async fn set_photo_ref(&self, channel_id: &str, seq: u64, url: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE messages SET content=? WHERE channel_id=? AND seq=? AND kind='photo'")
            .bind(url)
            .bind(channel_id)
            .bind(seq as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Single-connection in-memory pool. SQLite gives every connection its own
/// `:memory:` database, so the pool must never open a second one.
pub async fn in_memory() -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
}
