use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

// Cached (x, y) layout for the map view.
stored_object!(GraphPosition, "graph_position", {
    user_id: String,
    note_id: String,
    x: f32,
    y: f32,
    is_pinned: bool
});

impl GraphPosition {
    pub fn new(user_id: String, note_id: String, x: f32, y: f32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            note_id,
            x,
            y,
            is_pinned: false,
        }
    }

    pub async fn upsert(
        user_id: &str,
        note_id: &str,
        x: f32,
        y: f32,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        // Pinned positions are user decisions and stay where they are.
        db.client
            .query(
                "IF (SELECT VALUE id FROM graph_position WHERE user_id = $user_id AND \
                     note_id = $note_id)[0] != NONE THEN \
                   (UPDATE graph_position SET x = $x, y = $y, updated_at = time::now() \
                    WHERE user_id = $user_id AND note_id = $note_id AND is_pinned = false) \
                 ELSE \
                   (CREATE graph_position CONTENT { user_id: $user_id, note_id: $note_id, \
                      x: $x, y: $y, is_pinned: false, \
                      created_at: time::now(), updated_at: time::now() }) \
                 END",
            )
            .bind(("user_id", user_id.to_owned()))
            .bind(("note_id", note_id.to_owned()))
            .bind(("x", x))
            .bind(("y", y))
            .await?;
        Ok(())
    }
}
