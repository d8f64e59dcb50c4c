//! Postgres-backed implementation of the Store Adapter (C1, §4.1). The
//! document model of §3 is realized as normalized tables; this is the only
//! place in the workspace that knows SQL — every caller programs against
//! `crate::store::Store`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::{HashMap, HashSet};

use crate::error::AppError;
use crate::ids::{ConversationId, MessageId, UserId};
use crate::models::{
  Conversation, ConversationType, DeviceToken, DeviceType, FileInfo, Message, MessageType,
  Notification, NotificationPref, User, UserStatus, UserStats,
};
use crate::store::{
  ConversationWithUnread, CreateConversationOutcome, ListConversationsFilter, Page, Store,
};

pub struct PgStore {
  pool: PgPool,
}

impl PgStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  pub async fn connect(db_url: &str) -> Result<Self, AppError> {
    let pool = PgPool::connect(db_url)
      .await
      .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
    Ok(Self::new(pool))
  }

  /// Creates the schema if it does not already exist. Run once at startup
  /// by every binary that touches the store (fechatter_server,
  /// notification_consumer).
  pub async fn migrate(&self) -> Result<(), AppError> {
    let statements = [
      r#"CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        conversation_type TEXT NOT NULL,
        participants TEXT[] NOT NULL,
        direct_key TEXT,
        name TEXT,
        admins TEXT[] NOT NULL DEFAULT '{}',
        avatar_url TEXT,
        description TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        last_message_time TIMESTAMPTZ,
        last_message_preview TEXT,
        last_message_type TEXT,
        last_message_sender_id TEXT,
        muted_by TEXT[] NOT NULL DEFAULT '{}',
        metadata JSONB NOT NULL DEFAULT '{}'::jsonb
      )"#,
      r#"CREATE UNIQUE INDEX IF NOT EXISTS conversations_direct_key_uniq
        ON conversations (direct_key) WHERE conversation_type = 'direct'"#,
      r#"CREATE TABLE IF NOT EXISTS conversation_participants (
        conversation_id TEXT NOT NULL REFERENCES conversations(id),
        user_id TEXT NOT NULL,
        PRIMARY KEY (conversation_id, user_id)
      )"#,
      r#"CREATE INDEX IF NOT EXISTS conversation_participants_user_idx
        ON conversation_participants (user_id)"#,
      r#"CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL REFERENCES conversations(id),
        sender_id TEXT NOT NULL,
        content TEXT NOT NULL,
        message_type TEXT NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL DEFAULT now(),
        file_info JSONB,
        reactions JSONB NOT NULL DEFAULT '{}'::jsonb
      )"#,
      r#"CREATE INDEX IF NOT EXISTS messages_conversation_idx
        ON messages (conversation_id, timestamp DESC)"#,
      r#"CREATE TABLE IF NOT EXISTS message_read_by (
        message_id TEXT NOT NULL REFERENCES messages(id),
        user_id TEXT NOT NULL,
        PRIMARY KEY (message_id, user_id)
      )"#,
      r#"CREATE TABLE IF NOT EXISTS user_stats (
        conversation_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        unread_count BIGINT NOT NULL DEFAULT 0,
        last_read_message_id TEXT,
        PRIMARY KEY (conversation_id, user_id)
      )"#,
      r#"CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        name TEXT,
        is_online BOOLEAN NOT NULL DEFAULT false,
        status TEXT NOT NULL DEFAULT 'offline',
        last_active TIMESTAMPTZ NOT NULL DEFAULT now(),
        unread_notifications BIGINT NOT NULL DEFAULT 0
      )"#,
      r#"CREATE TABLE IF NOT EXISTS notification_prefs (
        user_id TEXT PRIMARY KEY,
        push_enabled BOOLEAN NOT NULL DEFAULT true,
        message_notifications BOOLEAN NOT NULL DEFAULT true,
        group_notifications BOOLEAN NOT NULL DEFAULT true,
        friend_request_notifications BOOLEAN NOT NULL DEFAULT true,
        system_notifications BOOLEAN NOT NULL DEFAULT true,
        mute_until TIMESTAMPTZ
      )"#,
      r#"CREATE TABLE IF NOT EXISTS device_tokens (
        user_id TEXT NOT NULL,
        token TEXT NOT NULL,
        device_type TEXT NOT NULL,
        last_updated TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (user_id, token)
      )"#,
      r#"CREATE TABLE IF NOT EXISTS notifications (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        notification_type TEXT NOT NULL,
        title TEXT NOT NULL,
        body TEXT NOT NULL,
        data JSONB NOT NULL DEFAULT '{}'::jsonb,
        is_read BOOLEAN NOT NULL DEFAULT false,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
      )"#,
    ];
    for stmt in statements {
      sqlx::query(stmt)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
    }
    Ok(())
  }

  fn conversation_type_str(t: ConversationType) -> &'static str {
    match t {
      ConversationType::Direct => "direct",
      ConversationType::Group => "group",
    }
  }

  fn parse_conversation_type(s: &str) -> ConversationType {
    match s {
      "direct" => ConversationType::Direct,
      _ => ConversationType::Group,
    }
  }

  fn message_type_str(t: MessageType) -> &'static str {
    match t {
      MessageType::Text => "text",
      MessageType::Image => "image",
      MessageType::Video => "video",
      MessageType::Audio => "audio",
      MessageType::File => "file",
    }
  }

  fn parse_message_type(s: &str) -> MessageType {
    match s {
      "image" => MessageType::Image,
      "video" => MessageType::Video,
      "audio" => MessageType::Audio,
      "file" => MessageType::File,
      _ => MessageType::Text,
    }
  }

  fn status_str(s: UserStatus) -> &'static str {
    match s {
      UserStatus::Available => "available",
      UserStatus::Away => "away",
      UserStatus::Busy => "busy",
      UserStatus::Invisible => "invisible",
      UserStatus::Offline => "offline",
    }
  }

  fn parse_status(s: &str) -> UserStatus {
    match s {
      "available" => UserStatus::Available,
      "away" => UserStatus::Away,
      "busy" => UserStatus::Busy,
      "invisible" => UserStatus::Invisible,
      _ => UserStatus::Offline,
    }
  }

  fn row_to_conversation(row: &sqlx::postgres::PgRow) -> Result<Conversation, AppError> {
    let participants: Vec<String> = row.try_get("participants").map_err(AppError::from)?;
    let admins: Vec<String> = row.try_get("admins").map_err(AppError::from)?;
    let muted_by: Vec<String> = row.try_get("muted_by").map_err(AppError::from)?;
    let conversation_type: String = row.try_get("conversation_type").map_err(AppError::from)?;
    let last_message_type: Option<String> =
      row.try_get("last_message_type").map_err(AppError::from)?;
    let last_message_sender_id: Option<String> = row
      .try_get("last_message_sender_id")
      .map_err(AppError::from)?;
    Ok(Conversation {
      id: ConversationId(row.try_get("id").map_err(AppError::from)?),
      conversation_type: Self::parse_conversation_type(&conversation_type),
      participants: participants.into_iter().map(UserId).collect(),
      name: row.try_get("name").map_err(AppError::from)?,
      admins: admins.into_iter().map(UserId).collect(),
      avatar_url: row.try_get("avatar_url").map_err(AppError::from)?,
      description: row.try_get("description").map_err(AppError::from)?,
      created_at: row.try_get("created_at").map_err(AppError::from)?,
      last_message_time: row.try_get("last_message_time").map_err(AppError::from)?,
      last_message_preview: row
        .try_get("last_message_preview")
        .map_err(AppError::from)?,
      last_message_type: last_message_type.map(|s| Self::parse_message_type(&s)),
      last_message_sender_id: last_message_sender_id.map(UserId),
      muted_by: muted_by.into_iter().map(UserId).collect(),
      metadata: row.try_get("metadata").map_err(AppError::from)?,
    })
  }

  async fn load_message_read_by(
    &self,
    message_id: &str,
  ) -> Result<HashSet<UserId>, AppError> {
    let rows = sqlx::query("SELECT user_id FROM message_read_by WHERE message_id = $1")
      .bind(message_id)
      .fetch_all(&self.pool)
      .await
      .map_err(AppError::from)?;
    Ok(
      rows
        .into_iter()
        .map(|r| UserId(r.get::<String, _>("user_id")))
        .collect(),
    )
  }

  fn row_to_message_partial(row: &sqlx::postgres::PgRow) -> Result<Message, AppError> {
    let message_type: String = row.try_get("message_type").map_err(AppError::from)?;
    let reactions_json: serde_json::Value = row.try_get("reactions").map_err(AppError::from)?;
    let reactions: HashMap<UserId, String> = match reactions_json {
      serde_json::Value::Object(map) => map
        .into_iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (UserId(k), s.to_string())))
        .collect(),
      _ => HashMap::new(),
    };
    let file_info: Option<serde_json::Value> = row.try_get("file_info").map_err(AppError::from)?;
    Ok(Message {
      id: MessageId(row.try_get("id").map_err(AppError::from)?),
      conversation_id: ConversationId(row.try_get("conversation_id").map_err(AppError::from)?),
      sender_id: UserId(row.try_get("sender_id").map_err(AppError::from)?),
      content: row.try_get("content").map_err(AppError::from)?,
      message_type: Self::parse_message_type(&message_type),
      timestamp: row.try_get("timestamp").map_err(AppError::from)?,
      read_by: HashSet::new(), // filled in by caller
      reactions,
      file_info: file_info.and_then(|v| serde_json::from_value::<FileInfo>(v).ok()),
    })
  }
}

#[async_trait]
impl Store for PgStore {
  async fn get_conversation(&self, c: &ConversationId) -> Result<Option<Conversation>, AppError> {
    let row = sqlx::query("SELECT * FROM conversations WHERE id = $1")
      .bind(&c.0)
      .fetch_optional(&self.pool)
      .await
      .map_err(AppError::from)?;
    row.as_ref().map(Self::row_to_conversation).transpose()
  }

  async fn list_conversations(
    &self,
    u: &UserId,
    filter: ListConversationsFilter,
    page: u32,
    size: u32,
  ) -> Result<Page<ConversationWithUnread>, AppError> {
    let page = page.max(1);
    let offset = (page - 1) as i64 * size as i64;

    let mut qb = sqlx::QueryBuilder::new(
      r#"SELECT c.*, COALESCE(us.unread_count, 0) AS joined_unread_count
         FROM conversations c
         JOIN conversation_participants cp ON cp.conversation_id = c.id
         LEFT JOIN user_stats us ON us.conversation_id = c.id AND us.user_id = cp.user_id
         WHERE cp.user_id = "#,
    );
    qb.push_bind(&u.0);
    if let Some(t) = filter.conversation_type {
      qb.push(" AND c.conversation_type = ").push_bind(Self::conversation_type_str(t));
    }
    if filter.unread_only {
      qb.push(" AND COALESCE(us.unread_count, 0) > 0");
    }
    qb.push(" ORDER BY c.last_message_time DESC NULLS LAST LIMIT ")
      .push_bind(size as i64)
      .push(" OFFSET ")
      .push_bind(offset);

    let rows = qb
      .build()
      .fetch_all(&self.pool)
      .await
      .map_err(AppError::from)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
      let conversation = Self::row_to_conversation(row)?;
      let unread_count: i64 = row.try_get("joined_unread_count").map_err(AppError::from)?;
      items.push(ConversationWithUnread {
        conversation,
        unread_count,
      });
    }

    let total: i64 = sqlx::query_scalar(
      "SELECT COUNT(*) FROM conversation_participants WHERE user_id = $1",
    )
    .bind(&u.0)
    .fetch_one(&self.pool)
    .await
    .map_err(AppError::from)?;

    Ok(Page {
      items,
      page,
      size,
      total,
    })
  }

  async fn create_conversation(
    &self,
    conversation_type: ConversationType,
    participants: Vec<UserId>,
    name: Option<String>,
    admins: Vec<UserId>,
    creator: UserId,
    initial_message: Option<String>,
  ) -> Result<CreateConversationOutcome, AppError> {
    let direct_key = match conversation_type {
      ConversationType::Direct => {
        let sorted = Conversation::direct_key(participants.clone());
        Some(sorted.iter().map(|u| u.0.clone()).collect::<Vec<_>>().join(","))
      }
      ConversationType::Group => None,
    };

    if let Some(ref key) = direct_key {
      let existing = sqlx::query("SELECT * FROM conversations WHERE direct_key = $1")
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
      if let Some(row) = existing {
        return Ok(CreateConversationOutcome::Existing(Self::row_to_conversation(&row)?));
      }
    }

    if conversation_type == ConversationType::Group && admins.is_empty() {
      return Err(AppError::Validation(
        "group conversations require at least one admin".into(),
      ));
    }

    let mut tx = self.pool.begin().await.map_err(AppError::from)?;
    let id = ConversationId::new();
    let participant_strs: Vec<String> = participants.iter().map(|u| u.0.clone()).collect();
    let admin_strs: Vec<String> = admins.iter().map(|u| u.0.clone()).collect();

    let row = sqlx::query(
      r#"INSERT INTO conversations
           (id, conversation_type, participants, direct_key, name, admins)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING *"#,
    )
    .bind(&id.0)
    .bind(Self::conversation_type_str(conversation_type))
    .bind(&participant_strs)
    .bind(&direct_key)
    .bind(&name)
    .bind(&admin_strs)
    .fetch_one(&mut *tx)
    .await
    .map_err(AppError::from)?;

    for p in &participants {
      sqlx::query(
        "INSERT INTO conversation_participants (conversation_id, user_id) VALUES ($1, $2)",
      )
      .bind(&id.0)
      .bind(&p.0)
      .execute(&mut *tx)
      .await
      .map_err(AppError::from)?;

      let initial_unread = if *p == creator {
        0
      } else if initial_message.is_some() {
        1
      } else {
        0
      };
      sqlx::query(
        "INSERT INTO user_stats (conversation_id, user_id, unread_count) VALUES ($1, $2, $3)",
      )
      .bind(&id.0)
      .bind(&p.0)
      .bind(initial_unread)
      .execute(&mut *tx)
      .await
      .map_err(AppError::from)?;
    }

    if let Some(content) = &initial_message {
      let message_id = MessageId::new();
      sqlx::query(
        "INSERT INTO messages (id, conversation_id, sender_id, content, message_type) VALUES ($1, $2, $3, $4, 'text')",
      )
      .bind(&message_id.0)
      .bind(&id.0)
      .bind(&creator.0)
      .bind(content)
      .execute(&mut *tx)
      .await
      .map_err(AppError::from)?;

      sqlx::query("INSERT INTO message_read_by (message_id, user_id) VALUES ($1, $2)")
        .bind(&message_id.0)
        .bind(&creator.0)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;

      let preview = crate::models::truncate_preview(content);
      sqlx::query(
        r#"UPDATE conversations SET last_message_time = now(), last_message_preview = $2,
             last_message_type = 'text', last_message_sender_id = $3 WHERE id = $1"#,
      )
      .bind(&id.0)
      .bind(&preview)
      .bind(&creator.0)
      .execute(&mut *tx)
      .await
      .map_err(AppError::from)?;
    }

    tx.commit().await.map_err(AppError::from)?;

    // Re-fetch to pick up the preview update if any.
    let final_row = sqlx::query("SELECT * FROM conversations WHERE id = $1")
      .bind(&id.0)
      .fetch_one(&self.pool)
      .await
      .map_err(AppError::from)
      .unwrap_or(row);
    Ok(CreateConversationOutcome::Created(Self::row_to_conversation(
      &final_row,
    )?))
  }

  async fn update_conversation_metadata(
    &self,
    c: &ConversationId,
    name: Option<String>,
    description: Option<String>,
    avatar_url: Option<String>,
  ) -> Result<Conversation, AppError> {
    let row = sqlx::query(
      r#"UPDATE conversations SET
           name = COALESCE($2, name),
           description = COALESCE($3, description),
           avatar_url = COALESCE($4, avatar_url)
         WHERE id = $1
         RETURNING *"#,
    )
    .bind(&c.0)
    .bind(&name)
    .bind(&description)
    .bind(&avatar_url)
    .fetch_optional(&self.pool)
    .await
    .map_err(AppError::from)?
    .ok_or_else(|| AppError::NotFound(format!("conversation {}", c.0)))?;
    Self::row_to_conversation(&row)
  }

  async fn add_member(&self, c: &ConversationId, user: UserId) -> Result<Conversation, AppError> {
    let mut tx = self.pool.begin().await.map_err(AppError::from)?;
    let row = sqlx::query(
      r#"UPDATE conversations SET participants = array_append(participants, $2)
         WHERE id = $1 AND NOT ($2 = ANY(participants))
         RETURNING *"#,
    )
    .bind(&c.0)
    .bind(&user.0)
    .fetch_optional(&mut *tx)
    .await
    .map_err(AppError::from)?;

    let row = match row {
      Some(r) => r,
      None => sqlx::query("SELECT * FROM conversations WHERE id = $1")
        .bind(&c.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::NotFound(format!("conversation {}", c.0)))?,
    };

    sqlx::query(
      "INSERT INTO conversation_participants (conversation_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(&c.0)
    .bind(&user.0)
    .execute(&mut *tx)
    .await
    .map_err(AppError::from)?;

    sqlx::query(
      "INSERT INTO user_stats (conversation_id, user_id, unread_count) VALUES ($1, $2, 0) ON CONFLICT DO NOTHING",
    )
    .bind(&c.0)
    .bind(&user.0)
    .execute(&mut *tx)
    .await
    .map_err(AppError::from)?;

    tx.commit().await.map_err(AppError::from)?;
    Self::row_to_conversation(&row)
  }

  async fn append_message(
    &self,
    c: &ConversationId,
    sender: &UserId,
    content: &str,
    message_type: MessageType,
    file_info: Option<FileInfo>,
  ) -> Result<Message, AppError> {
    let id = MessageId::new();
    let file_info_json = file_info
      .as_ref()
      .map(serde_json::to_value)
      .transpose()
      .map_err(|e| AppError::internal(e))?;

    let mut tx = self.pool.begin().await.map_err(AppError::from)?;
    let row = sqlx::query(
      r#"INSERT INTO messages (id, conversation_id, sender_id, content, message_type, file_info)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING *"#,
    )
    .bind(&id.0)
    .bind(&c.0)
    .bind(&sender.0)
    .bind(content)
    .bind(Self::message_type_str(message_type))
    .bind(&file_info_json)
    .fetch_one(&mut *tx)
    .await
    .map_err(AppError::from)?;

    sqlx::query("INSERT INTO message_read_by (message_id, user_id) VALUES ($1, $2)")
      .bind(&id.0)
      .bind(&sender.0)
      .execute(&mut *tx)
      .await
      .map_err(AppError::from)?;
    tx.commit().await.map_err(AppError::from)?;

    let mut message = Self::row_to_message_partial(&row)?;
    message.read_by = HashSet::from([sender.clone()]);
    Ok(message)
  }

  async fn get_message(
    &self,
    c: &ConversationId,
    m: &MessageId,
  ) -> Result<Option<Message>, AppError> {
    let row = sqlx::query("SELECT * FROM messages WHERE conversation_id = $1 AND id = $2")
      .bind(&c.0)
      .bind(&m.0)
      .fetch_optional(&self.pool)
      .await
      .map_err(AppError::from)?;
    match row {
      None => Ok(None),
      Some(row) => {
        let mut message = Self::row_to_message_partial(&row)?;
        message.read_by = self.load_message_read_by(&m.0).await?;
        Ok(Some(message))
      }
    }
  }

  async fn list_messages(
    &self,
    c: &ConversationId,
    page: u32,
    size: u32,
  ) -> Result<Page<Message>, AppError> {
    let page = page.max(1);
    let offset = (page - 1) as i64 * size as i64;
    let rows = sqlx::query(
      "SELECT * FROM messages WHERE conversation_id = $1 ORDER BY timestamp DESC LIMIT $2 OFFSET $3",
    )
    .bind(&c.0)
    .bind(size as i64)
    .bind(offset)
    .fetch_all(&self.pool)
    .await
    .map_err(AppError::from)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
      let mut m = Self::row_to_message_partial(row)?;
      m.read_by = self.load_message_read_by(&m.id.0).await?;
      items.push(m);
    }

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = $1")
      .bind(&c.0)
      .fetch_one(&self.pool)
      .await
      .map_err(AppError::from)?;

    Ok(Page {
      items,
      page,
      size,
      total,
    })
  }

  async fn update_conversation_preview(
    &self,
    c: &ConversationId,
    preview: &str,
    message_type: MessageType,
    sender_id: &UserId,
    timestamp: DateTime<Utc>,
  ) -> Result<(), AppError> {
    sqlx::query(
      r#"UPDATE conversations SET
           last_message_time = $2, last_message_preview = $3,
           last_message_type = $4, last_message_sender_id = $5
         WHERE id = $1"#,
    )
    .bind(&c.0)
    .bind(timestamp)
    .bind(crate::models::truncate_preview(preview))
    .bind(Self::message_type_str(message_type))
    .bind(&sender_id.0)
    .execute(&self.pool)
    .await
    .map_err(AppError::from)?;
    Ok(())
  }

  async fn bump_unread(&self, c: &ConversationId, participants: &[UserId]) -> Result<(), AppError> {
    if participants.is_empty() {
      return Ok(());
    }
    let user_strs: Vec<String> = participants.iter().map(|u| u.0.clone()).collect();
    sqlx::query(
      r#"INSERT INTO user_stats (conversation_id, user_id, unread_count)
         SELECT $1, u, 1 FROM UNNEST($2::text[]) AS u
         ON CONFLICT (conversation_id, user_id)
         DO UPDATE SET unread_count = GREATEST(user_stats.unread_count, 0) + 1"#,
    )
    .bind(&c.0)
    .bind(&user_strs)
    .execute(&self.pool)
    .await
    .map_err(AppError::from)?;
    Ok(())
  }

  async fn add_to_read_by(
    &self,
    c: &ConversationId,
    m: &MessageId,
    u: &UserId,
  ) -> Result<bool, AppError> {
    // `c` is validated by the caller (message write/read paths already hold
    // a loaded conversation); the message_id foreign key is sufficient here.
    let _ = c;
    let result = sqlx::query(
      "INSERT INTO message_read_by (message_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(&m.0)
    .bind(&u.0)
    .execute(&self.pool)
    .await
    .map_err(AppError::from)?;
    Ok(result.rows_affected() > 0)
  }

  async fn decrement_unread(&self, c: &ConversationId, u: &UserId) -> Result<(), AppError> {
    sqlx::query(
      r#"INSERT INTO user_stats (conversation_id, user_id, unread_count) VALUES ($1, $2, 0)
         ON CONFLICT (conversation_id, user_id)
         DO UPDATE SET unread_count = GREATEST(user_stats.unread_count - 1, 0)"#,
    )
    .bind(&c.0)
    .bind(&u.0)
    .execute(&self.pool)
    .await
    .map_err(AppError::from)?;
    Ok(())
  }

  async fn reset_unread(&self, c: &ConversationId, u: &UserId) -> Result<(), AppError> {
    sqlx::query(
      r#"INSERT INTO user_stats (conversation_id, user_id, unread_count) VALUES ($1, $2, 0)
         ON CONFLICT (conversation_id, user_id) DO UPDATE SET unread_count = 0"#,
    )
    .bind(&c.0)
    .bind(&u.0)
    .execute(&self.pool)
    .await
    .map_err(AppError::from)?;
    Ok(())
  }

  async fn mark_all_read(&self, c: &ConversationId, u: &UserId) -> Result<i64, AppError> {
    let result = sqlx::query(
      r#"INSERT INTO message_read_by (message_id, user_id)
         SELECT m.id, $2 FROM messages m
         WHERE m.conversation_id = $1
           AND NOT EXISTS (
             SELECT 1 FROM message_read_by r WHERE r.message_id = m.id AND r.user_id = $2
           )"#,
    )
    .bind(&c.0)
    .bind(&u.0)
    .execute(&self.pool)
    .await
    .map_err(AppError::from)?;
    self.reset_unread(c, u).await?;
    Ok(result.rows_affected() as i64)
  }

  async fn recompute_unread(&self, c: &ConversationId, u: &UserId) -> Result<i64, AppError> {
    let count: i64 = sqlx::query_scalar(
      r#"SELECT COUNT(*) FROM messages m
         WHERE m.conversation_id = $1
           AND NOT EXISTS (
             SELECT 1 FROM message_read_by r WHERE r.message_id = m.id AND r.user_id = $2
           )"#,
    )
    .bind(&c.0)
    .bind(&u.0)
    .fetch_one(&self.pool)
    .await
    .map_err(AppError::from)?;

    sqlx::query(
      r#"INSERT INTO user_stats (conversation_id, user_id, unread_count) VALUES ($1, $2, $3)
         ON CONFLICT (conversation_id, user_id) DO UPDATE SET unread_count = $3
         WHERE user_stats.unread_count <> $3"#,
    )
    .bind(&c.0)
    .bind(&u.0)
    .bind(count)
    .execute(&self.pool)
    .await
    .map_err(AppError::from)?;
    Ok(count)
  }

  async fn get_user_stats(&self, c: &ConversationId, u: &UserId) -> Result<UserStats, AppError> {
    let row = sqlx::query(
      "SELECT unread_count, last_read_message_id FROM user_stats WHERE conversation_id = $1 AND user_id = $2",
    )
    .bind(&c.0)
    .bind(&u.0)
    .fetch_optional(&self.pool)
    .await
    .map_err(AppError::from)?;

    match row {
      Some(row) => Ok(UserStats {
        conversation_id: c.clone(),
        user_id: u.clone(),
        unread_count: row.try_get("unread_count").map_err(AppError::from)?,
        last_read_message_id: row
          .try_get::<Option<String>, _>("last_read_message_id")
          .map_err(AppError::from)?
          .map(MessageId),
      }),
      None => Ok(UserStats {
        conversation_id: c.clone(),
        user_id: u.clone(),
        unread_count: 0,
        last_read_message_id: None,
      }),
    }
  }

  async fn set_reaction(
    &self,
    c: &ConversationId,
    m: &MessageId,
    u: &UserId,
    emoji: Option<String>,
  ) -> Result<HashMap<UserId, String>, AppError> {
    let _ = c;
    let row = sqlx::query(
      r#"UPDATE messages SET reactions =
           CASE WHEN $3::text IS NULL THEN reactions - $2
                ELSE jsonb_set(reactions, ARRAY[$2], to_jsonb($3::text)) END
         WHERE id = $1
         RETURNING reactions"#,
    )
    .bind(&m.0)
    .bind(&u.0)
    .bind(&emoji)
    .fetch_optional(&self.pool)
    .await
    .map_err(AppError::from)?
    .ok_or_else(|| AppError::NotFound(format!("message {}", m.0)))?;

    let reactions_json: serde_json::Value = row.try_get("reactions").map_err(AppError::from)?;
    let reactions = match reactions_json {
      serde_json::Value::Object(map) => map
        .into_iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (UserId(k), s.to_string())))
        .collect(),
      _ => HashMap::new(),
    };
    Ok(reactions)
  }

  async fn get_user(&self, u: &UserId) -> Result<Option<User>, AppError> {
    let row = sqlx::query("SELECT * FROM users WHERE id = $1")
      .bind(&u.0)
      .fetch_optional(&self.pool)
      .await
      .map_err(AppError::from)?;
    row
      .map(|row| -> Result<User, AppError> {
        let status: String = row.try_get("status").map_err(AppError::from)?;
        Ok(User {
          id: UserId(row.try_get("id").map_err(AppError::from)?),
          name: row.try_get("name").map_err(AppError::from)?,
          is_online: row.try_get("is_online").map_err(AppError::from)?,
          status: Self::parse_status(&status),
          last_active: row.try_get("last_active").map_err(AppError::from)?,
          unread_notifications: row.try_get("unread_notifications").map_err(AppError::from)?,
        })
      })
      .transpose()
  }

  async fn upsert_user(&self, u: &User) -> Result<(), AppError> {
    sqlx::query(
      r#"INSERT INTO users (id, name, is_online, status, last_active, unread_notifications)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (id) DO UPDATE SET
           name = EXCLUDED.name, is_online = EXCLUDED.is_online, status = EXCLUDED.status,
           last_active = EXCLUDED.last_active, unread_notifications = EXCLUDED.unread_notifications"#,
    )
    .bind(&u.id.0)
    .bind(&u.name)
    .bind(u.is_online)
    .bind(Self::status_str(u.status))
    .bind(u.last_active)
    .bind(u.unread_notifications)
    .execute(&self.pool)
    .await
    .map_err(AppError::from)?;
    Ok(())
  }

  async fn set_user_online(&self, u: &UserId, online: bool) -> Result<(), AppError> {
    sqlx::query(
      r#"INSERT INTO users (id, is_online, last_active) VALUES ($1, $2, now())
         ON CONFLICT (id) DO UPDATE SET is_online = $2, last_active = now()"#,
    )
    .bind(&u.0)
    .bind(online)
    .execute(&self.pool)
    .await
    .map_err(AppError::from)?;
    Ok(())
  }

  async fn set_user_status(&self, u: &UserId, status: UserStatus) -> Result<(), AppError> {
    sqlx::query(
      r#"INSERT INTO users (id, status, last_active) VALUES ($1, $2, now())
         ON CONFLICT (id) DO UPDATE SET status = $2, last_active = now()"#,
    )
    .bind(&u.0)
    .bind(Self::status_str(status))
    .execute(&self.pool)
    .await
    .map_err(AppError::from)?;
    Ok(())
  }

  async fn get_notification_pref(&self, u: &UserId) -> Result<Option<NotificationPref>, AppError> {
    let row = sqlx::query("SELECT * FROM notification_prefs WHERE user_id = $1")
      .bind(&u.0)
      .fetch_optional(&self.pool)
      .await
      .map_err(AppError::from)?;
    row
      .map(|row| -> Result<NotificationPref, AppError> {
        Ok(NotificationPref {
          user_id: UserId(row.try_get("user_id").map_err(AppError::from)?),
          push_enabled: row.try_get("push_enabled").map_err(AppError::from)?,
          message_notifications: row.try_get("message_notifications").map_err(AppError::from)?,
          group_notifications: row.try_get("group_notifications").map_err(AppError::from)?,
          friend_request_notifications: row
            .try_get("friend_request_notifications")
            .map_err(AppError::from)?,
          system_notifications: row.try_get("system_notifications").map_err(AppError::from)?,
          mute_until: row.try_get("mute_until").map_err(AppError::from)?,
        })
      })
      .transpose()
  }

  async fn list_device_tokens(
    &self,
    u: &UserId,
    device_type: Option<DeviceType>,
  ) -> Result<Vec<DeviceToken>, AppError> {
    let type_str = device_type.map(|t| match t {
      DeviceType::Ios => "ios",
      DeviceType::Android => "android",
      DeviceType::Web => "web",
    });
    let rows = sqlx::query(
      "SELECT * FROM device_tokens WHERE user_id = $1 AND ($2::text IS NULL OR device_type = $2)",
    )
    .bind(&u.0)
    .bind(type_str)
    .fetch_all(&self.pool)
    .await
    .map_err(AppError::from)?;

    rows
      .into_iter()
      .map(|row| -> Result<DeviceToken, AppError> {
        let dt: String = row.try_get("device_type").map_err(AppError::from)?;
        Ok(DeviceToken {
          user_id: UserId(row.try_get("user_id").map_err(AppError::from)?),
          token: row.try_get("token").map_err(AppError::from)?,
          device_type: match dt.as_str() {
            "ios" => DeviceType::Ios,
            "android" => DeviceType::Android,
            _ => DeviceType::Web,
          },
          last_updated: row.try_get("last_updated").map_err(AppError::from)?,
        })
      })
      .collect()
  }

  async fn delete_device_token(&self, u: &UserId, token: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM device_tokens WHERE user_id = $1 AND token = $2")
      .bind(&u.0)
      .bind(token)
      .execute(&self.pool)
      .await
      .map_err(AppError::from)?;
    Ok(())
  }

  async fn insert_notification(&self, n: &Notification) -> Result<(), AppError> {
    let data = serde_json::to_value(&n.data).map_err(|e| AppError::internal(e))?;
    let type_str = format!("{:?}", n.notification_type);
    sqlx::query(
      r#"INSERT INTO notifications (id, user_id, notification_type, title, body, data, is_read, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (id) DO NOTHING"#,
    )
    .bind(&n.id)
    .bind(&n.user_id.0)
    .bind(type_str)
    .bind(&n.title)
    .bind(&n.body)
    .bind(&data)
    .bind(n.is_read)
    .bind(n.created_at)
    .execute(&self.pool)
    .await
    .map_err(AppError::from)?;
    Ok(())
  }

  async fn increment_unread_notifications(&self, u: &UserId) -> Result<(), AppError> {
    sqlx::query(
      r#"INSERT INTO users (id, unread_notifications) VALUES ($1, 1)
         ON CONFLICT (id) DO UPDATE SET unread_notifications = users.unread_notifications + 1"#,
    )
    .bind(&u.0)
    .execute(&self.pool)
    .await
    .map_err(AppError::from)?;
    Ok(())
  }

  async fn find_unread_inconsistencies(
    &self,
  ) -> Result<Vec<(ConversationId, UserId)>, AppError> {
    let rows = sqlx::query(
      r#"SELECT us.conversation_id, us.user_id FROM user_stats us
         WHERE us.unread_count <> (
           SELECT COUNT(*) FROM messages m
           WHERE m.conversation_id = us.conversation_id
             AND NOT EXISTS (
               SELECT 1 FROM message_read_by r WHERE r.message_id = m.id AND r.user_id = us.user_id
             )
         )"#,
    )
    .fetch_all(&self.pool)
    .await
    .map_err(AppError::from)?;

    rows
      .into_iter()
      .map(|row| -> Result<(ConversationId, UserId), AppError> {
        Ok((
          ConversationId(row.try_get("conversation_id").map_err(AppError::from)?),
          UserId(row.try_get("user_id").map_err(AppError::from)?),
        ))
      })
      .collect()
  }
}
