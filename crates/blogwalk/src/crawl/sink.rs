// ABOUTME: Append-only destinations for posts emitted during a crawl.

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::blog::Post;

/// Receives posts in crawl order as each page is extracted.
pub trait PostSink {
    fn accept(&mut self, post: &Post);
}

impl PostSink for Vec<Post> {
    fn accept(&mut self, post: &Post) {
        self.push(post.clone());
    }
}

impl PostSink for UnboundedSender<Post> {
    fn accept(&mut self, post: &Post) {
        if self.send(post.clone()).is_err() {
            debug!(post_id = ?post.post_id, "post receiver dropped");
        }
    }
}

/// Sink that drops everything; the outcome still carries the posts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl PostSink for Discard {
    fn accept(&mut self, _post: &Post) {}
}

impl<S: PostSink + ?Sized> PostSink for &mut S {
    fn accept(&mut self, post: &Post) {
        (**self).accept(post)
    }
}
