use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::*;

#[derive(Default, Serialize, Deserialize)]
struct State {
    users: BTreeMap<Id, User>,
    posts: BTreeMap<Id, Post>,
    comments: BTreeMap<Id, Comment>,
    // parent id -> direct child ids, rebuilt from `comments` after a load
    #[serde(skip)]
    children: HashMap<Id, Vec<Id>>,
    next_id: Id,
}

impl State {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }

    fn rebuild_children(&mut self) {
        self.children.clear();
        for c in self.comments.values() {
            if let Some(parent) = c.parent_id {
                self.children.entry(parent).or_default().push(c.id);
            }
        }
        for ids in self.children.values_mut() {
            ids.sort_unstable();
        }
    }

    /// `root` and every transitive reply, found by walking the child index.
    fn subtree(&self, root: Id) -> Vec<Id> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(kids) = self.children.get(&id) {
                stack.extend(kids.iter().copied());
            }
        }
        out
    }

    fn remove_comments(&mut self, ids: &[Id]) -> u64 {
        let mut removed = 0;
        for id in ids {
            if let Some(c) = self.comments.remove(id) {
                removed += 1;
                if let Some(parent) = c.parent_id {
                    if let Some(siblings) = self.children.get_mut(&parent) {
                        siblings.retain(|s| s != id);
                    }
                }
            }
            self.children.remove(id);
        }
        removed
    }
}

/// In-process store. Every mutation happens under one write lock, so each
/// operation is atomic. With a snapshot path the state is written to JSON
/// after every mutation and reloaded on start.
#[derive(Clone, Default)]
pub struct InMemRepo {
    state: Arc<RwLock<State>>,
    snapshot_path: Option<Arc<PathBuf>>,
}

impl InMemRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut state = Self::load_state_from(&path);
        state.rebuild_children();
        Self {
            state: Arc::new(RwLock::new(state)),
            snapshot_path: Some(Arc::new(path)),
        }
    }

    fn load_state_from(path: &Path) -> State {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                Ok(s) => {
                    info!("loaded snapshot '{}'", path.display());
                    s
                }
                Err(e) => {
                    warn!("failed to parse snapshot '{}': {e}, starting empty", path.display());
                    State::default()
                }
            },
            Err(e) => {
                info!("no snapshot at '{}' ({e}), starting empty", path.display());
                State::default()
            }
        }
    }

    /// Called with the write guard held. Goes through a temp file renamed
    /// over the target so the snapshot on disk is always complete.
    fn persist(&self, state: &State) {
        let Some(path) = self.snapshot_path.as_deref() else { return };
        let bytes = match serde_json::to_vec_pretty(state) {
            Ok(b) => b,
            Err(e) => {
                warn!("failed to serialise snapshot: {e}");
                return;
            }
        };
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let tmp = path.with_extension("tmp");
        if let Err(e) = std::fs::write(&tmp, bytes).and_then(|_| std::fs::rename(&tmp, path)) {
            warn!("failed to write snapshot '{}': {e}", path.display());
        }
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }
}

fn page<T>(items: impl Iterator<Item = T>, skip: i64, limit: i64) -> Vec<T> {
    items.skip(skip.max(0) as usize).take(limit.max(0) as usize).collect()
}

#[async_trait]
impl UserRepo for InMemRepo {
    async fn create_user(&self, new: NewUserRecord) -> RepoResult<User> {
        let mut s = self.write()?;
        if s.users.values().any(|u| u.username == new.username) {
            return Err(RepoError::Conflict);
        }
        let id = s.next_id();
        let user = User {
            id,
            username: new.username,
            hashed_password: new.hashed_password,
            auto_respond: false,
            respond_time: DEFAULT_RESPOND_TIME,
        };
        s.users.insert(id, user.clone());
        self.persist(&s);
        Ok(user)
    }

    async fn get_user(&self, id: Id) -> RepoResult<User> {
        self.read()?.users.get(&id).cloned().ok_or(RepoError::NotFound("user"))
    }

    async fn find_user_by_username(&self, username: &str) -> RepoResult<User> {
        self.read()?
            .users
            .values()
            .find(|u| u.username == username)
            .cloned()
            .ok_or(RepoError::NotFound("user"))
    }

    async fn update_user_settings(&self, id: Id, upd: UserSettings) -> RepoResult<User> {
        let mut s = self.write()?;
        let user = s.users.get_mut(&id).ok_or(RepoError::NotFound("user"))?;
        if let Some(flag) = upd.auto_respond { user.auto_respond = flag; }
        if let Some(t) = upd.respond_time { user.respond_time = t; }
        let updated = user.clone();
        self.persist(&s);
        Ok(updated)
    }
}

#[async_trait]
impl PostRepo for InMemRepo {
    async fn create_post(&self, draft: PostDraft) -> RepoResult<Post> {
        let mut s = self.write()?;
        let id = s.next_id();
        let post = Post {
            id,
            title: draft.title,
            text: draft.text,
            author_id: draft.author_id,
            is_blocked: draft.is_blocked,
            created_at: draft.created_at,
        };
        s.posts.insert(id, post.clone());
        self.persist(&s);
        Ok(post)
    }

    async fn get_post(&self, id: Id) -> RepoResult<Post> {
        self.read()?.posts.get(&id).cloned().ok_or(RepoError::NotFound("post"))
    }

    async fn list_posts(&self, filter: PostFilter) -> RepoResult<Vec<Post>> {
        let s = self.read()?;
        let matching = s
            .posts
            .values()
            .filter(|p| filter.author_id.map_or(true, |a| p.author_id == a))
            .cloned();
        Ok(page(matching, filter.skip, filter.limit))
    }

    async fn update_post(&self, id: Id, changes: PostChanges) -> RepoResult<Post> {
        let mut s = self.write()?;
        let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound("post"))?;
        post.title = changes.title;
        post.text = changes.text;
        post.is_blocked = changes.is_blocked;
        let updated = post.clone();
        self.persist(&s);
        Ok(updated)
    }

    async fn delete_post(&self, id: Id) -> RepoResult<()> {
        let mut s = self.write()?;
        if s.posts.remove(&id).is_none() {
            return Err(RepoError::NotFound("post"));
        }
        let owned: Vec<Id> = s.comments.values().filter(|c| c.post_id == id).map(|c| c.id).collect();
        s.remove_comments(&owned);
        self.persist(&s);
        Ok(())
    }
}

#[async_trait]
impl CommentRepo for InMemRepo {
    async fn create_comment(&self, draft: CommentDraft) -> RepoResult<Comment> {
        let mut s = self.write()?;
        if !s.posts.contains_key(&draft.post_id) {
            return Err(RepoError::NotFound("post"));
        }
        if let Some(parent_id) = draft.parent_id {
            let parent = s.comments.get(&parent_id).ok_or(RepoError::NotFound("parent comment"))?;
            if parent.post_id != draft.post_id {
                return Err(RepoError::PostMismatch);
            }
        }
        let id = s.next_id();
        let comment = Comment {
            id,
            text: draft.text,
            author_id: draft.author_id,
            post_id: draft.post_id,
            parent_id: draft.parent_id,
            is_blocked: draft.is_blocked,
            created_at: draft.created_at,
        };
        if let Some(parent_id) = comment.parent_id {
            s.children.entry(parent_id).or_default().push(id);
        }
        s.comments.insert(id, comment.clone());
        self.persist(&s);
        Ok(comment)
    }

    async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
        self.read()?.comments.get(&id).cloned().ok_or(RepoError::NotFound("comment"))
    }

    async fn list_replies(&self, parent_id: Id) -> RepoResult<Vec<Comment>> {
        let s = self.read()?;
        let replies = s
            .children
            .get(&parent_id)
            .map(|ids| ids.iter().filter_map(|id| s.comments.get(id).cloned()).collect())
            .unwrap_or_default();
        Ok(replies)
    }

    async fn list_top_level(&self, filter: CommentFilter) -> RepoResult<Vec<Comment>> {
        let s = self.read()?;
        let matching = s
            .comments
            .values()
            .filter(|c| c.parent_id.is_none())
            .filter(|c| filter.post_id.map_or(true, |p| c.post_id == p))
            .filter(|c| filter.author_id.map_or(true, |a| c.author_id == a))
            .cloned();
        Ok(page(matching, filter.skip, filter.limit))
    }

    async fn update_comment(&self, id: Id, text: String, is_blocked: bool) -> RepoResult<Comment> {
        let mut s = self.write()?;
        let comment = s.comments.get_mut(&id).ok_or(RepoError::NotFound("comment"))?;
        comment.text = text;
        comment.is_blocked = is_blocked;
        let updated = comment.clone();
        self.persist(&s);
        Ok(updated)
    }

    async fn delete_comment(&self, id: Id) -> RepoResult<u64> {
        let mut s = self.write()?;
        if !s.comments.contains_key(&id) {
            return Err(RepoError::NotFound("comment"));
        }
        let doomed = s.subtree(id);
        let removed = s.remove_comments(&doomed);
        self.persist(&s);
        Ok(removed)
    }
}

#[async_trait]
impl AnalyticsRepo for InMemRepo {
    async fn comment_breakdown(&self, from: NaiveDate, to: NaiveDate) -> RepoResult<Vec<CommentBreakdown>> {
        let s = self.read()?;
        let mut days: BTreeMap<NaiveDate, (i64, i64)> = BTreeMap::new();
        for c in s.comments.values() {
            let day = c.created_at.date_naive();
            if day < from || day > to {
                continue;
            }
            let entry = days.entry(day).or_default();
            entry.0 += 1;
            if c.is_blocked {
                entry.1 += 1;
            }
        }
        Ok(days
            .into_iter()
            .map(|(date, (total_comments, blocked_comments))| CommentBreakdown { date, total_comments, blocked_comments })
            .collect())
    }
}
