use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;

use vboard::api::types::RegisterUser;
use vboard::api::{ApiClient, NewPost, Post, PostPatch};
use vboard::cache::{
  CacheKeys, CacheSource, KeyValueStore, NoopStorage, PostCache, SqliteStorage,
};
use vboard::config::Config;
use vboard::feed::{PageQuery, PageView, PostEditor, PostFeed, PER_PAGE};
use vboard::identity::{ChainedIdentity, IdentityProvider, SessionIdentity, StaticIdentity};
use vboard::logging;

type Storage = Arc<dyn KeyValueStore>;
type Feed = PostFeed<ApiClient, Storage>;

#[derive(Parser, Debug)]
#[command(name = "vboard")]
#[command(about = "Browse and post to a Visual Board, with an offline post cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/vboard/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List posts, newest first
  Posts {
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    page: u32,
    /// Only posts of the signed-in user (always from the network)
    #[arg(long)]
    mine: bool,
    /// Print every emission (cached page, then corrections) as it arrives
    #[arg(short, long)]
    watch: bool,
  },
  /// Show one post
  Show { id: i64 },
  /// Create a post
  Create(PostFields),
  /// Change some fields of a post
  Edit {
    id: i64,
    #[command(flatten)]
    fields: PatchFields,
  },
  /// Replace every field of a post
  Replace {
    id: i64,
    #[command(flatten)]
    fields: PostFields,
  },
  /// Delete a post
  Delete { id: i64 },
  /// Drop the cache and reload a page from the backend
  Refresh {
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    page: u32,
  },
  /// Bring back a post hidden because its image broke
  Reactivate {
    id: i64,
    /// Point the post at a new image
    #[arg(long)]
    image_url: Option<String>,
  },
  /// Image health statistics; `--check` starts a background check first
  Images {
    #[arg(long)]
    check: bool,
  },
  /// Random images from the discover feed
  Discover {
    #[arg(short = 'n', long, default_value_t = 30)]
    count: u32,
  },
  /// Inspect or manage the local post cache
  Cache {
    #[command(subcommand)]
    action: CacheCommand,
  },
  /// Sign in; without a password the name is just remembered locally
  Login {
    username_or_email: String,
    #[arg(short, long)]
    password: Option<String>,
  },
  /// Forget the signed-in user
  Logout,
  /// Create an account
  Register {
    username: String,
    email: String,
    #[arg(short, long)]
    password: String,
    #[arg(long)]
    full_name: Option<String>,
  },
  /// Show who requests are sent as
  Whoami,
  /// Upload an image and print its url
  Upload { path: PathBuf },
  /// Check backend health
  Health,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  /// Show snapshot size, watermark and freshness
  Status,
  /// Remove the snapshot
  Clear,
  /// Drop inactive posts from the snapshot
  Prune,
}

#[derive(ClapArgs, Debug)]
struct PostFields {
  #[arg(long)]
  title: String,
  #[arg(long)]
  image_url: String,
  #[arg(long)]
  description: Option<String>,
  /// Repeat for several tags
  #[arg(long = "tag")]
  tags: Vec<String>,
}

impl From<PostFields> for NewPost {
  fn from(fields: PostFields) -> Self {
    NewPost {
      title: fields.title,
      description: fields.description,
      image_url: fields.image_url,
      tags: fields.tags,
    }
  }
}

#[derive(ClapArgs, Debug)]
struct PatchFields {
  #[arg(long)]
  title: Option<String>,
  #[arg(long)]
  image_url: Option<String>,
  #[arg(long)]
  description: Option<String>,
  /// Replaces all tags; repeat for several
  #[arg(long = "tag")]
  tags: Vec<String>,
}

impl From<PatchFields> for PostPatch {
  fn from(fields: PatchFields) -> Self {
    PostPatch {
      title: fields.title,
      description: fields.description,
      image_url: fields.image_url,
      tags: (!fields.tags.is_empty()).then_some(fields.tags),
    }
  }
}

/// Everything a command may need, built once from config.
struct Context {
  client: Arc<ApiClient>,
  feed: Feed,
  session: SessionIdentity,
}

impl Context {
  fn new(config: &Config) -> Result<Self> {
    let db_path = match &config.cache.path {
      Some(path) => path.clone(),
      None => SqliteStorage::default_path()?,
    };
    let db: Storage =
      Arc::new(SqliteStorage::open_at(&db_path)?.with_quota(config.cache.max_value_bytes));

    // The session lives in the same file even when post caching is off
    let session = SessionIdentity::new(db.clone());
    let mut providers: Vec<Box<dyn IdentityProvider>> = Vec::new();
    if let Some(user) = config.user_id() {
      providers.push(Box::new(StaticIdentity::new(user)));
    }
    providers.push(Box::new(session.clone()));
    let identity = Arc::new(ChainedIdentity::new(providers));

    let client = Arc::new(ApiClient::new(
      &config.api.url,
      config.api.timeout(),
      identity,
    )?);

    let cache_storage: Storage = if config.cache.enabled {
      db
    } else {
      Arc::new(NoopStorage)
    };
    let cache = PostCache::new(cache_storage, CacheKeys::for_backend(client.base_url()));
    let feed = PostFeed::new(client.clone(), Arc::new(cache));

    Ok(Self {
      client,
      feed,
      session,
    })
  }

  fn editor(&self) -> PostEditor<ApiClient, Storage> {
    PostEditor::new(self.feed.clone())
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let _log_guard = match logging::default_log_dir() {
    Some(dir) => Some(logging::init(&dir)?),
    None => None,
  };

  let ctx = Context::new(&config)?;
  run(&ctx, args.command).await
}

async fn run(ctx: &Context, command: Command) -> Result<()> {
  match command {
    Command::Posts { page, mine, watch } => {
      if mine {
        let response = ctx.client.my_posts(page, PER_PAGE).await?;
        print_page(&PageView::from_response(response, page), CacheSource::Network);
        return Ok(());
      }
      let mut query = PageQuery::new();
      query.load(&ctx.feed, page);
      show_query(&mut query, watch).await
    }
    Command::Refresh { page } => {
      let mut query = PageQuery::at(page);
      query.refresh(&ctx.feed).await;
      show_query(&mut query, false).await
    }
    Command::Reactivate { id, image_url } => {
      let done = ctx.editor().reactivate(id, image_url.as_deref()).await?;
      println!("Reactivated post {}", done.post_id);
      Ok(())
    }
    Command::Images { check } => {
      if check {
        let started = ctx.client.check_images().await?;
        println!("Image check started ({} scope)", started.scope);
      }
      let stats = ctx.client.image_health().await?;
      println!(
        "{} posts: {} active, {} inactive, {} unchecked ({:.1}% healthy)",
        stats.total_posts,
        stats.active_posts,
        stats.inactive_posts,
        stats.unchecked_posts,
        stats.health_percentage
      );
      Ok(())
    }
    Command::Show { id } => {
      let post = ctx.editor().get(id).await?;
      print_post_detail(&post);
      Ok(())
    }
    Command::Create(fields) => {
      let post = ctx.editor().create(&fields.into()).await?;
      println!("Created post {}", post.id);
      Ok(())
    }
    Command::Edit { id, fields } => {
      let post = ctx.editor().partial_update(id, &fields.into()).await?;
      println!("Updated post {}", post.id);
      Ok(())
    }
    Command::Replace { id, fields } => {
      let post = ctx.editor().update(id, &fields.into()).await?;
      println!("Replaced post {}", post.id);
      Ok(())
    }
    Command::Delete { id } => {
      ctx.editor().delete(id).await?;
      println!("Deleted post {}", id);
      Ok(())
    }
    Command::Discover { count } => {
      for item in ctx.client.discover(count).await? {
        let title = item.title.as_deref().unwrap_or("(untitled)");
        println!("{}  {}  by {}  [{}]", item.id, title, item.author, item.source);
        println!("    {}", item.image_url);
      }
      Ok(())
    }
    Command::Cache { action } => run_cache(ctx, action),
    Command::Login {
      username_or_email,
      password,
    } => {
      let username = match password {
        Some(password) => ctx.client.login(&username_or_email, &password).await?.username,
        None => username_or_email,
      };
      ctx.session.sign_in(&username)?;
      println!("Signed in as {}", username.trim());
      Ok(())
    }
    Command::Logout => {
      ctx.session.sign_out()?;
      println!("Signed out");
      Ok(())
    }
    Command::Register {
      username,
      email,
      password,
      full_name,
    } => {
      if !ctx.client.check_username(&username).await?.available {
        return Err(eyre!("Username {} is already taken", username));
      }
      let user = ctx
        .client
        .register(&RegisterUser {
          username,
          email,
          full_name,
          password,
        })
        .await?;
      ctx.session.sign_in(&user.username)?;
      println!("Registered and signed in as {}", user.username);
      Ok(())
    }
    Command::Whoami => {
      match ctx.client.identity().user_id() {
        Some(user) => match ctx.client.profile(&user).await {
          Ok(profile) => println!(
            "{} <{}>{}",
            profile.username,
            profile.email,
            profile
              .full_name
              .as_deref()
              .map(|n| format!(" ({})", n))
              .unwrap_or_default()
          ),
          // Local-only names have no profile on the backend
          Err(_) => println!("{}", user),
        },
        None => println!("anonymous"),
      }
      Ok(())
    }
    Command::Upload { path } => {
      let image = ctx.client.upload_image(&path).await?;
      println!("{}", image.image_url);
      Ok(())
    }
    Command::Health => {
      let health = ctx.client.health().await?;
      println!("{}", health.status);
      for (service, up) in &health.services {
        println!("  {}: {}", service, if *up { "up" } else { "down" });
      }
      if health.is_healthy() {
        Ok(())
      } else {
        Err(eyre!("Backend reports {}", health.status))
      }
    }
  }
}

fn run_cache(ctx: &Context, action: CacheCommand) -> Result<()> {
  let cache = ctx.feed.cache();
  match action {
    CacheCommand::Status => match cache.get_cached_posts() {
      Some(snapshot) => {
        let fresh = if cache.is_cache_valid() { "fresh" } else { "stale" };
        println!(
          "{} posts cached at {} ({})",
          snapshot.posts.len(),
          snapshot.timestamp,
          fresh
        );
      }
      None => println!("No cached posts"),
    },
    CacheCommand::Clear => {
      cache.clear();
      println!("Cache cleared");
    }
    CacheCommand::Prune => {
      let kept = cache.filter_inactive_posts();
      println!("{} active posts kept", kept.len());
    }
  }
  Ok(())
}

/// Print the page, and with `watch` every later correction too.
async fn show_query(query: &mut PageQuery, watch: bool) -> Result<()> {
  if watch {
    print_query(query);
    while query.next().await {
      print_query(query);
    }
  } else {
    while query.next().await {}
    print_query(query);
  }

  match query.error() {
    Some(error) => Err(eyre!("Failed to load page {}: {}", query.page(), error)),
    None => Ok(()),
  }
}

fn print_query(query: &PageQuery) {
  if let (Some(view), Some(source)) = (query.view(), query.source()) {
    print_page(view, source);
  }
}

fn print_page(view: &PageView<Post>, source: CacheSource) {
  let from = match source {
    CacheSource::Cache => "cache",
    CacheSource::Network => "network",
  };
  println!(
    "Page {}/{} ({} posts, from {})",
    view.current_page, view.total_pages, view.total, from
  );
  if view.is_empty() {
    println!("  (no posts)");
  }
  for post in view.visible_items() {
    let tags = if post.tags.is_empty() {
      String::new()
    } else {
      format!("  #{}", post.tags.join(" #"))
    };
    println!(
      "  {:>5}  {}  by {}  {}{}",
      post.id,
      post.title,
      post.author_name(),
      post.created_at,
      tags
    );
  }
  match (view.has_previous(), view.has_next()) {
    (true, true) => println!(
      "  more: --page {} / --page {}",
      view.current_page - 1,
      view.current_page + 1
    ),
    (false, true) => println!("  next: --page {}", view.current_page + 1),
    (true, false) => println!("  previous: --page {}", view.current_page - 1),
    (false, false) => {}
  }
  println!();
}

fn print_post_detail(post: &Post) {
  println!("#{} {}", post.id, post.title);
  println!("by {} at {}", post.author_name(), post.created_at);
  if let Some(updated) = &post.updated_at {
    println!("updated {}", updated);
  }
  if let Some(description) = &post.description {
    println!();
    println!("{}", description);
  }
  println!();
  println!("image: {}", post.image_url);
  if !post.tags.is_empty() {
    println!("tags:  {}", post.tags.join(", "));
  }
}
