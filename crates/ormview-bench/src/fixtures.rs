//! Data generation for benchmarks.
//!
//! Generators are seeded so every run fetches the same graph.

use ormview_core::{EntityDef, FieldDef, MemoryStore, RelationDef, Schema, Value, View};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SEED: u64 = 12345;

/// Scale factor for benchmark data generation.
#[derive(Clone, Copy, Debug, Default)]
pub enum Scale {
    /// 10 users. Use for quick iteration.
    Tiny,
    /// 100 users.
    #[default]
    Small,
    /// 1,000 users.
    Medium,
}

impl Scale {
    /// Number of users at this scale.
    pub fn users(&self) -> usize {
        match self {
            Scale::Tiny => 10,
            Scale::Small => 100,
            Scale::Medium => 1_000,
        }
    }

    /// Posts per user.
    pub fn posts_per_user(&self) -> usize {
        match self {
            Scale::Tiny => 2,
            Scale::Small => 5,
            Scale::Medium => 5,
        }
    }

    /// Comments per post.
    pub fn comments_per_post(&self) -> usize {
        match self {
            Scale::Tiny => 1,
            Scale::Small => 3,
            Scale::Medium => 2,
        }
    }
}

fn random_string(rng: &mut StdRng, len: usize) -> String {
    (0..len).map(|_| rng.sample(Alphanumeric) as char).collect()
}

/// Schema shared by every benchmark: users with tags, posts, comments, and
/// pets split into dogs and cats.
pub fn blog_schema() -> Schema {
    Schema::new(1)
        .with_entity(
            EntityDef::new("User", "id")
                .with_scalars(["id", "name", "email"])
                .with_field(FieldDef::collection("tags")),
        )
        .with_entity(EntityDef::new("Post", "id").with_scalars(["id", "title", "views"]))
        .with_entity(EntityDef::new("Comment", "id").with_scalars(["id", "text"]))
        .with_entity(EntityDef::new("Pet", "id").with_scalars(["id", "name"]))
        .with_entity(EntityDef::new("Dog", "id").extends("Pet").with_scalars(["breed"]))
        .with_entity(EntityDef::new("Cat", "id").extends("Pet").with_scalars(["lives"]))
        .with_relation(RelationDef::one_to_many("posts", "User", "Post"))
        .with_relation(RelationDef::one_to_many("pets", "User", "Pet"))
        .with_relation(RelationDef::one_to_many("comments", "Post", "Comment"))
}

/// A memory store populated at `scale`.
pub fn blog_store(scale: Scale) -> MemoryStore {
    let store = MemoryStore::new(blog_schema());
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut next_post = 0i64;
    let mut next_comment = 0i64;

    for user in 0..scale.users() as i64 {
        let fields = [
            ("name", Value::from(format!("user_{user}"))),
            ("email", Value::from(format!("user{}@example{}.com", user, user % 10))),
        ];
        if store.insert("User", user, fields).is_err() {
            continue;
        }
        for _ in 0..rng.gen_range(0..4) {
            let _ = store.push_element("User", user, "tags", random_string(&mut rng, 6));
        }

        for _ in 0..scale.posts_per_user() {
            next_post += 1;
            let post = next_post;
            let fields = [
                ("title", Value::from(random_string(&mut rng, 24))),
                ("views", Value::Int(rng.gen_range(0..10_000))),
            ];
            let _ = store.insert("Post", post, fields);
            let _ = store.link("User", user, "posts", post);

            for _ in 0..scale.comments_per_post() {
                next_comment += 1;
                let text = Value::from(random_string(&mut rng, 40));
                let _ = store.insert("Comment", next_comment, [("text", text)]);
                let _ = store.link("Post", post, "comments", next_comment);
            }
        }

        let pet = user * 2;
        let _ = if rng.gen_bool(0.5) {
            store.insert(
                "Dog",
                pet,
                [("name", Value::from("rex")), ("breed", Value::from("lab"))],
            )
        } else {
            store.insert("Cat", pet, [("name", Value::from("tom")), ("lives", Value::Int(9))])
        };
        let _ = store.link("User", user, "pets", pet);
    }

    tracing::debug!(records = store.len(), ?scale, "Generated benchmark store");
    store
}

/// A view joining the user's tags and posts, two parallel collections.
pub fn wide_view() -> View {
    View::new("User").with_paths(["name", "email", "tags", "posts.title", "posts.comments.text"])
}

/// A view reaching pets, whose dogs carry a subtype-only field.
pub fn pets_view() -> View {
    View::new("User").with_paths(["name", "posts.title", "pets.name", "pets.breed"])
}

/// A view nesting posts and their comments as sub-views.
pub fn nested_view() -> View {
    View::new("User").with_paths(["name", "posts"]).with_subview(
        "posts",
        View::new("Post")
            .with_paths(["title", "views", "comments"])
            .with_subview("comments", View::new("Comment").with_paths(["text"])),
    )
}
