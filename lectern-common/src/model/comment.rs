//! Comments: replies by parent index, approval gating and thread assembly.
//!
//! A comment refers to its parent by id only. Trees are assembled at read time by
//! [`build_threads`], which is also where approval gating for listings happens.

use crate::{
    model::{
        Id,
        post::PostMarker,
        user::{User, UserSummary},
    },
    validation::{FieldError, LengthError, ValidationErrors, WriteMode},
    util::char_len,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

pub const COMMENT_MIN_LEN: usize = 5;
pub const COMMENT_MAX_LEN: usize = 1000;
/// Top-level comments sit at depth 0, so a thread is at most this many replies deep.
pub const MAX_REPLY_DEPTH: usize = 32;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct CommentMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Comment {
    pub id: Id<CommentMarker>,
    pub post_id: Id<PostMarker>,
    pub author: UserSummary,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub approved: bool,
    pub parent_id: Option<Id<CommentMarker>>,
    pub like_count: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct CommentThread {
    #[serde(flatten)]
    pub comment: Comment,
    pub replies: Vec<CommentThread>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct SubmittedComment {
    pub comment: Comment,
    pub notice: &'static str,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct ApprovalToggle {
    pub approved: bool,
    pub message: &'static str,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
pub struct CommentInput {
    pub content: Option<String>,
    pub parent_id: Option<Id<CommentMarker>>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct NewComment {
    pub content: String,
    pub parent: Option<Id<CommentMarker>>,
    pub approved: bool,
}

/// Only the content of an existing comment can change. Its parent is fixed at creation.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct CommentChanges {
    pub content: Option<String>,
}

/// Comments by staff and superusers skip moderation.
#[must_use]
pub fn initial_approval(author: &User) -> bool {
    author.is_privileged()
}

pub fn validate_comment_content(raw: &str) -> Result<String, FieldError> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(FieldError::EmptyComment);
    }

    let len = char_len(content);
    if len < COMMENT_MIN_LEN {
        return Err(LengthError::TooShort {
            min: COMMENT_MIN_LEN,
        }
        .into());
    }
    if len > COMMENT_MAX_LEN {
        return Err(LengthError::TooLong {
            max: COMMENT_MAX_LEN,
        }
        .into());
    }

    Ok(content.to_owned())
}

impl CommentInput {
    /// Validates a new comment written by `author`.
    ///
    /// That the parent belongs to the same post is checked by the store, under the same
    /// transaction as the insert.
    pub fn validate_new(self, author: &User) -> Result<NewComment, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let content = errors.field("content", WriteMode::Full, self.content, |content| {
            validate_comment_content(&content)
        });

        let Some(content) = content else {
            return Err(errors);
        };
        errors.finish(NewComment {
            content,
            parent: self.parent_id,
            approved: initial_approval(author),
        })
    }

    pub fn validate(self, mode: WriteMode) -> Result<CommentChanges, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let content = errors.field("content", mode, self.content, |content| {
            validate_comment_content(&content)
        });

        errors.finish(CommentChanges { content })
    }
}

impl Comment {
    #[must_use]
    pub fn can_be_modified_by(&self, user: &User) -> bool {
        self.author.id == user.id || user.is_privileged()
    }

    /// Approved comments are public. Unapproved ones only show to their author and moderators.
    #[must_use]
    pub fn is_visible_to(&self, viewer: Option<&User>) -> bool {
        self.approved || viewer.is_some_and(|viewer| self.can_be_modified_by(viewer))
    }
}

#[must_use]
pub fn submission_notice(approved: bool) -> &'static str {
    if approved {
        "Your comment has been submitted."
    } else {
        "Your comment has been submitted. It is pending approval."
    }
}

#[must_use]
pub fn approval_message(approved: bool) -> &'static str {
    if approved {
        "Comment has been approved."
    } else {
        "Comment has been unapproved."
    }
}

/// Assembles the approved comments of one post into reply trees.
///
/// Unapproved comments are dropped together with every reply below them. Siblings keep the
/// relative order they had in `comments`, so passing them newest first yields newest-first
/// threads at every level.
#[must_use]
pub fn build_threads(comments: Vec<Comment>) -> Vec<CommentThread> {
    let mut children: HashMap<Option<Id<CommentMarker>>, Vec<Comment>> = HashMap::new();
    for comment in comments.into_iter().filter(|comment| comment.approved) {
        children.entry(comment.parent_id).or_default().push(comment);
    }

    let roots = children.remove(&None).unwrap_or_default();
    let mut forest = Vec::with_capacity(roots.len());
    for root in roots {
        // Depth-first with an explicit stack, so chain length is bounded by the heap only.
        let mut stack = vec![PendingThread::new(root, &mut children)];
        while let Some(top) = stack.last_mut() {
            if let Some(reply) = top.unvisited.next() {
                stack.push(PendingThread::new(reply, &mut children));
                continue;
            }

            let Some(done) = stack.pop() else { break };
            let thread = CommentThread {
                comment: done.comment,
                replies: done.replies,
            };
            match stack.last_mut() {
                Some(parent) => parent.replies.push(thread),
                None => forest.push(thread),
            }
        }
    }

    forest
}

struct PendingThread {
    comment: Comment,
    unvisited: std::vec::IntoIter<Comment>,
    replies: Vec<CommentThread>,
}

impl PendingThread {
    fn new(
        comment: Comment,
        children: &mut HashMap<Option<Id<CommentMarker>>, Vec<Comment>>,
    ) -> Self {
        let unvisited = children.remove(&Some(comment.id)).unwrap_or_default();
        Self {
            comment,
            replies: Vec::with_capacity(unvisited.len()),
            unvisited: unvisited.into_iter(),
        }
    }
}
