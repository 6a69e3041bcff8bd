use crate::{
    client::{DbClient, Result, now},
    record::{AuthenticationRecord, LoginRecord, ProfileRecord, UserRecord},
};
use lectern_common::model::{
    Id,
    auth::{AuthTokenHash, Authentication},
    user::{CreateUser, Profile, ProfileChanges, User, UserChanges, UserMarker},
};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::info;

const USER_COLUMNS: &str = "
    users.id,
    users.username,
    users.email,
    users.first_name,
    users.last_name,
    users.is_staff,
    users.is_superuser,
    users.date_joined";

async fn fetch_user_by_id(conn: &mut SqliteConnection, id: Id<UserMarker>) -> Result<Option<User>> {
    let record: Option<UserRecord> =
        sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE users.id = ?"))
            .bind(id.get())
            .fetch_optional(&mut *conn)
            .await?;

    Ok(record.map(User::from))
}

async fn fetch_profile_by_user(
    conn: &mut SqliteConnection,
    user_id: Id<UserMarker>,
) -> Result<Option<Profile>> {
    let record: Option<ProfileRecord> = sqlx::query_as(
        "
        SELECT user_id, bio, location, birth_date, profile_pic, website
        FROM profiles
        WHERE user_id = ?
        ",
    )
    .bind(user_id.get())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(record.map(Profile::from))
}

/// Pushes `, column = ?` for a present value, or `column = ?` if it is the first assignment.
fn push_assignment<'args, T>(
    query: &mut QueryBuilder<'args, Sqlite>,
    first: &mut bool,
    column: &str,
    value: Option<T>,
) where
    T: 'args + sqlx::Encode<'args, Sqlite> + sqlx::Type<Sqlite> + Send,
{
    let Some(value) = value else {
        return;
    };
    if !*first {
        query.push(", ");
    }
    *first = false;
    query.push(column).push(" = ").push_bind(value);
}

impl DbClient {
    pub async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        let mut conn = self.pool.acquire().await?;
        fetch_user_by_id(&mut conn, user_id).await
    }

    pub async fn fetch_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let record: Option<UserRecord> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE users.username = ?"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(User::from))
    }

    /// The user with `username` together with their stored password hash.
    pub async fn fetch_login(&self, username: &str) -> Result<Option<(User, String)>> {
        let record: Option<LoginRecord> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS}, users.password_hash FROM users WHERE users.username = ?"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(|record| (record.user.into(), record.password_hash)))
    }

    /// Whether a user other than `except` already has this username.
    pub async fn username_taken(
        &self,
        username: &str,
        except: Option<Id<UserMarker>>,
    ) -> Result<bool> {
        let taken = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE username = ? AND id IS NOT ?)",
        )
        .bind(username)
        .bind(except.map(Id::get))
        .fetch_one(&self.pool)
        .await?;

        Ok(taken)
    }

    /// Whether a user other than `except` already has this email address.
    pub async fn email_taken(&self, email: &str, except: Option<Id<UserMarker>>) -> Result<bool> {
        let taken = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE email = ? AND id IS NOT ?)",
        )
        .bind(email)
        .bind(except.map(Id::get))
        .fetch_one(&self.pool)
        .await?;

        Ok(taken)
    }

    /// Creates a user and its profile. Either both exist afterwards or neither does.
    pub async fn create_user(&self, user: &CreateUser) -> Result<(User, Profile)> {
        let mut tx = self.pool.begin().await?;

        let record: UserRecord = sqlx::query_as(&format!(
            "
            INSERT INTO users (
                username, email, first_name, last_name, password_hash,
                is_staff, is_superuser, date_joined
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {USER_COLUMNS}
            "
        ))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.password_hash)
        .bind(user.is_staff)
        .bind(user.is_superuser)
        .bind(now())
        .fetch_one(&mut *tx)
        .await?;

        let profile: ProfileRecord = sqlx::query_as(
            "
            INSERT INTO profiles (user_id)
            VALUES (?)
            RETURNING user_id, bio, location, birth_date, profile_pic, website
            ",
        )
        .bind(record.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(user_id = record.id, username = %record.username, "Created user");
        Ok((record.into(), profile.into()))
    }

    pub async fn fetch_account(&self, user_id: Id<UserMarker>) -> Result<Option<(User, Profile)>> {
        let mut conn = self.pool.acquire().await?;
        let Some(user) = fetch_user_by_id(&mut conn, user_id).await? else {
            return Ok(None);
        };
        let profile = fetch_profile_by_user(&mut conn, user_id).await?;

        Ok(profile.map(|profile| (user, profile)))
    }

    /// Applies account and profile changes in one transaction.
    pub async fn update_account(
        &self,
        user_id: Id<UserMarker>,
        user: UserChanges,
        profile: ProfileChanges,
    ) -> Result<Option<(User, Profile)>> {
        let mut tx = self.pool.begin().await?;

        let mut first = true;
        let mut query = QueryBuilder::<Sqlite>::new("UPDATE users SET ");
        push_assignment(&mut query, &mut first, "username", user.username);
        push_assignment(&mut query, &mut first, "email", user.email);
        push_assignment(&mut query, &mut first, "first_name", user.first_name);
        push_assignment(&mut query, &mut first, "last_name", user.last_name);
        if !first {
            query.push(" WHERE id = ").push_bind(user_id.get());
            query.build().execute(&mut *tx).await?;
        }

        let mut first = true;
        let mut query = QueryBuilder::<Sqlite>::new("UPDATE profiles SET ");
        push_assignment(&mut query, &mut first, "bio", profile.bio);
        push_assignment(&mut query, &mut first, "location", profile.location);
        push_assignment(&mut query, &mut first, "birth_date", profile.birth_date);
        push_assignment(&mut query, &mut first, "website", profile.website);
        push_assignment(&mut query, &mut first, "profile_pic", profile.profile_pic);
        if !first {
            query.push(" WHERE user_id = ").push_bind(user_id.get());
            query.build().execute(&mut *tx).await?;
        }

        let user = fetch_user_by_id(&mut tx, user_id).await?;
        let profile = fetch_profile_by_user(&mut tx, user_id).await?;
        tx.commit().await?;

        Ok(user.zip(profile))
    }

    pub async fn create_auth(&self, authentication: &Authentication) -> Result<()> {
        sqlx::query(
            "
            INSERT INTO auth_tokens (token_hash, user_id, created_at, expires_after_seconds)
            VALUES (?, ?, ?, ?)
            ",
        )
        .bind(authentication.token_hash.0.as_slice())
        .bind(authentication.user.get())
        .bind(authentication.created_at)
        .bind(
            authentication
                .expires_after
                .map(|expires_after| expires_after.whole_seconds()),
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn fetch_auth(&self, token_hash: &AuthTokenHash) -> Result<Option<Authentication>> {
        let record: Option<AuthenticationRecord> = sqlx::query_as(
            "
            SELECT user_id, token_hash, created_at, expires_after_seconds
            FROM auth_tokens
            WHERE token_hash = ?
            ",
        )
        .bind(token_hash.0.as_slice())
        .fetch_optional(&self.pool)
        .await?;

        let authentication = record.map(Authentication::try_from).transpose()?;
        Ok(authentication)
    }

    /// Revokes a token. Returns whether it existed.
    pub async fn delete_auth(&self, token_hash: &AuthTokenHash) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM auth_tokens WHERE token_hash = ?")
            .bind(token_hash.0.as_slice())
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::client::{
        DbError,
        tests::{client, user},
    };
    use lectern_common::model::{
        auth::{AuthToken, Authentication},
        user::{CreateUser, DEFAULT_PROFILE_PIC, ProfileChanges, UserChanges},
    };
    use lectern_common::util::PositiveDuration;
    use time::{Duration, OffsetDateTime};

    #[tokio::test]
    async fn users_get_a_profile() {
        let db = client().await;
        let ada = user(&db, "ada", false).await;

        let (fetched, profile) = db.fetch_account(ada.id).await.unwrap().unwrap();
        assert_eq!(fetched, ada);
        assert_eq!(profile.user_id, ada.id);
        assert_eq!(profile.profile_pic, DEFAULT_PROFILE_PIC);
        assert_eq!(profile.birth_date, None);
    }

    #[tokio::test]
    async fn duplicate_usernames_are_rejected() {
        let db = client().await;
        let ada = user(&db, "ada", false).await;

        assert!(db.username_taken("ada", None).await.unwrap());
        assert!(!db.username_taken("ada", Some(ada.id)).await.unwrap());
        assert!(db.email_taken("ada@example.com", None).await.unwrap());

        let duplicate = db
            .create_user(&CreateUser {
                username: "ada".to_owned(),
                email: "other@example.com".to_owned(),
                first_name: String::new(),
                last_name: String::new(),
                password_hash: String::new(),
                is_staff: false,
                is_superuser: false,
            })
            .await;
        assert!(matches!(duplicate, Err(DbError::Integrity(_))));
    }

    #[tokio::test]
    async fn account_updates_touch_only_given_fields() {
        let db = client().await;
        let ada = user(&db, "ada", false).await;

        let (updated, profile) = db
            .update_account(
                ada.id,
                UserChanges {
                    first_name: Some("Augusta".to_owned()),
                    ..UserChanges::default()
                },
                ProfileChanges {
                    location: Some("London".to_owned()),
                    ..ProfileChanges::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.first_name, "Augusta");
        assert_eq!(updated.username, "ada");
        assert_eq!(profile.location, "London");
        assert_eq!(profile.bio, "");
    }

    #[tokio::test]
    async fn auth_tokens() {
        let db = client().await;
        let ada = user(&db, "ada", false).await;
        let token_hash = AuthToken::generate_random(ada.id).hash().unwrap();
        let authentication = Authentication {
            user: ada.id,
            token_hash: token_hash.clone(),
            created_at: OffsetDateTime::now_utc(),
            expires_after: PositiveDuration::new(Duration::hours(24)),
        };

        db.create_auth(&authentication).await.unwrap();
        let fetched = db.fetch_auth(&token_hash).await.unwrap().unwrap();
        assert_eq!(fetched.user, ada.id);
        assert_eq!(fetched.expires_after, authentication.expires_after);

        assert!(db.delete_auth(&token_hash).await.unwrap());
        assert!(db.fetch_auth(&token_hash).await.unwrap().is_none());
        assert!(!db.delete_auth(&token_hash).await.unwrap());
    }
}
