use crate::{
    model::Id,
    util::char_len,
    validation::{
        FieldError, ValidationErrors, WriteMode, validate_length, validate_optional_text,
        validate_text,
    },
};
use serde::{Deserialize, Deserializer, Serialize};
use time::{Date, OffsetDateTime};
use validator::{ValidateEmail, ValidateUrl};

pub const USERNAME_MAX_LEN: usize = 150;
pub const NAME_MAX_LEN: usize = 30;
pub const EMAIL_MAX_LEN: usize = 254;
pub const PASSWORD_MIN_LEN: usize = 8;
pub const BIO_MAX_LEN: usize = 500;
pub const LOCATION_MAX_LEN: usize = 100;
pub const WEBSITE_MAX_LEN: usize = 200;
pub const PROFILE_PIC_MAX_LEN: usize = 100;
pub const DEFAULT_PROFILE_PIC: &str = "default.jpg";

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

fn nullable_date<'de, D>(deserializer: D) -> Result<Option<Option<Date>>, D::Error>
where
    D: Deserializer<'de>,
{
    iso_date::option::deserialize(deserializer).map(Some)
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct UserMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct User {
    pub id: Id<UserMarker>,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub date_joined: OffsetDateTime,
}

/// How other entities refer to their author.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Deserialize, Serialize)]
pub struct UserSummary {
    pub id: Id<UserMarker>,
    pub username: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Profile {
    pub user_id: Id<UserMarker>,
    pub bio: String,
    pub location: String,
    #[serde(with = "iso_date::option")]
    pub birth_date: Option<Date>,
    pub profile_pic: String,
    pub website: String,
}

/// A profile as clients see it, with the URL its picture is served under.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct ProfileView {
    #[serde(flatten)]
    pub profile: Profile,
    pub image_url: String,
}

/// The signed in user's own account.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct Account {
    pub user: User,
    pub profile: ProfileView,
}

/// What anyone may see of a user. The email address is left out.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct PublicUser {
    pub id: Id<UserMarker>,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub date_joined: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct PublicAccount {
    pub user: PublicUser,
    pub profile: ProfileView,
}

impl From<Profile> for ProfileView {
    fn from(profile: Profile) -> Self {
        Self {
            image_url: profile.image_url(),
            profile,
        }
    }
}

impl Account {
    #[must_use]
    pub fn new(user: User, profile: Profile) -> Self {
        Self {
            user,
            profile: profile.into(),
        }
    }
}

impl PublicAccount {
    #[must_use]
    pub fn new(user: User, profile: Profile) -> Self {
        let user = PublicUser {
            id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            date_joined: user.date_joined,
        };

        Self {
            user,
            profile: profile.into(),
        }
    }
}

impl User {
    /// Staff and superusers moderate comments and get their own comments approved immediately.
    #[must_use]
    pub fn is_privileged(&self) -> bool {
        self.is_staff || self.is_superuser
    }
}

impl Profile {
    #[must_use]
    pub fn image_url(&self) -> String {
        if self.profile_pic.is_empty() {
            format!("/media/{DEFAULT_PROFILE_PIC}")
        } else {
            format!("/media/{}", self.profile_pic)
        }
    }
}

/// A registration form as submitted.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
pub struct Registration {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password1: Option<String>,
    pub password2: Option<String>,
}

/// A registration that passed every field check. Uniqueness is checked against the store.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

/// What the store needs to create a user together with its profile.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct CreateUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub is_staff: bool,
    pub is_superuser: bool,
}

/// `PATCH /users/me`: account and profile fields in one body.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
pub struct AccountInput {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    #[serde(default, deserialize_with = "nullable_date")]
    pub birth_date: Option<Option<Date>>,
    pub website: Option<String>,
    pub profile_pic: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct ProfileChanges {
    pub bio: Option<String>,
    pub location: Option<String>,
    /// `Some(None)` clears the date.
    pub birth_date: Option<Option<Date>>,
    pub website: Option<String>,
    pub profile_pic: Option<String>,
}

pub fn validate_username(value: String) -> Result<String, FieldError> {
    let username = validate_text(&value, 1, USERNAME_MAX_LEN)?;
    let allowed = |c: char| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_');
    if username.chars().all(allowed) {
        Ok(username)
    } else {
        Err(FieldError::Invalid(
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
        ))
    }
}

pub fn validate_email(value: String) -> Result<String, FieldError> {
    let email = validate_text(&value, 1, EMAIL_MAX_LEN)?;

    // Addresses need a dotted domain, so `x@localhost` is out.
    let dotted_domain = email
        .rsplit_once('@')
        .is_some_and(|(_, domain)| domain.contains('.'));
    if email.validate_email() && dotted_domain {
        Ok(email)
    } else {
        Err(FieldError::Invalid("Enter a valid email address."))
    }
}

fn validate_person_name(value: String) -> Result<String, FieldError> {
    validate_text(&value, 1, NAME_MAX_LEN)
}

pub fn validate_password(password: &str) -> Result<(), FieldError> {
    if password.is_empty() {
        return Err(FieldError::Blank);
    }
    if char_len(password) < PASSWORD_MIN_LEN {
        return Err(FieldError::Invalid(
            "This password is too short. It must contain at least 8 characters.",
        ));
    }
    if password.chars().all(|c| c.is_ascii_digit()) {
        return Err(FieldError::Invalid("This password is entirely numeric."));
    }
    Ok(())
}

pub fn validate_website(value: String) -> Result<String, FieldError> {
    let website = validate_optional_text(&value, WEBSITE_MAX_LEN)?;
    if website.is_empty() {
        return Ok(website);
    }

    let scheme = website.split_once("://").map(|(scheme, _)| scheme);
    let http = scheme.is_some_and(|scheme| {
        scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")
    });
    if http && website.validate_url() {
        Ok(website)
    } else {
        Err(FieldError::Invalid("Enter a valid URL."))
    }
}

impl Registration {
    pub fn validate(self) -> Result<NewUser, ValidationErrors> {
        let mode = WriteMode::Full;
        let mut errors = ValidationErrors::new();

        let username = errors.field("username", mode, self.username, validate_username);
        let email = errors.field("email", mode, self.email, validate_email);
        let first_name = errors.field("first_name", mode, self.first_name, validate_person_name);
        let last_name = errors.field("last_name", mode, self.last_name, validate_person_name);
        let password1 = errors.field("password1", mode, self.password1, |password| {
            validate_password(&password).map(|()| password)
        });
        let password2 = errors.field("password2", mode, self.password2, Ok);

        if let (Some(password1), Some(password2)) = (&password1, &password2)
            && password1 != password2
        {
            errors.add(
                "password2",
                FieldError::Invalid("The two password fields didn't match."),
            );
        }

        let (Some(username), Some(email), Some(first_name), Some(last_name), Some(password), Some(_)) =
            (username, email, first_name, last_name, password1, password2)
        else {
            return Err(errors);
        };

        errors.finish(NewUser {
            username,
            email,
            first_name,
            last_name,
            password,
        })
    }
}

impl AccountInput {
    pub fn validate(self) -> Result<(UserChanges, ProfileChanges), ValidationErrors> {
        let mode = WriteMode::Partial;
        let mut errors = ValidationErrors::new();

        let user = UserChanges {
            username: errors.field("username", mode, self.username, validate_username),
            email: errors.field("email", mode, self.email, validate_email),
            first_name: errors.field("first_name", mode, self.first_name, validate_person_name),
            last_name: errors.field("last_name", mode, self.last_name, validate_person_name),
        };
        let profile = ProfileChanges {
            bio: errors.field("bio", mode, self.bio, |bio| {
                validate_optional_text(&bio, BIO_MAX_LEN)
            }),
            location: errors.field("location", mode, self.location, |location| {
                validate_optional_text(&location, LOCATION_MAX_LEN)
            }),
            birth_date: self.birth_date,
            website: errors.field("website", mode, self.website, validate_website),
            profile_pic: errors.field("profile_pic", mode, self.profile_pic, |pic| {
                validate_length(&pic, 1, PROFILE_PIC_MAX_LEN)
                    .map(|()| pic)
                    .map_err(FieldError::from)
            }),
        };

        errors.finish((user, profile))
    }
}
