use sovran_store::{KeyedStore, ScalarStore, StoreError, StoreManager};
use std::sync::Arc;

/// Demonstrates keyed stores, watchers and checkpointing the data table
fn main() -> Result<(), StoreError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sovran_store=debug")),
        )
        .init();

    let manager = Arc::new(StoreManager::new());

    // Register every store up front
    let scoreboard = Scoreboard::register(Arc::clone(&manager))?;
    manager.finish_setup()?;

    scoreboard.record("alice", 10)?;
    scoreboard.record("bob", 5)?;
    scoreboard.record("alice", 7)?;
    scoreboard.print()?;

    // Everyone gets a bonus point
    scoreboard.scores.map(&manager, |_, score| Some(*score + 1))?;
    scoreboard.print()?;

    scoreboard.scores.clear(&manager, "alice")?;
    scoreboard.print()?;

    let saved = serde_json::to_string_pretty(&manager.snapshot()?)
        .map_err(|e| StoreError::Codec {
            store: scoreboard.scores.id(),
            cause: e.to_string(),
        })?;
    println!("\nCheckpoint:\n{}", saved);

    Ok(())
}

struct Scoreboard {
    manager: Arc<StoreManager>,
    scores: KeyedStore<str, u32>,
    leader: ScalarStore<String>,
}

impl Scoreboard {
    fn register(manager: Arc<StoreManager>) -> Result<Self, StoreError> {
        let scores = manager.register_keyed::<u32>()?;
        let leader = manager.register_scalar::<String>()?;

        // Keep the leader in sync with the scores
        scores.watch(&manager, move |manager, _, _| {
            let best = scores
                .get_all(manager)?
                .into_iter()
                .max_by_key(|(_, score)| *score)
                .map(|(player, _)| player);
            match best {
                Some(player) => leader.set(manager, player)?,
                None => leader.clear(manager)?,
            }
            Ok(())
        })?;

        leader.watch(&manager, |_, leader| {
            if let Some(leader) = leader {
                println!("  leader is now {}", leader);
            }
            Ok(())
        })?;

        Ok(Self {
            manager,
            scores,
            leader,
        })
    }

    fn record(&self, player: &str, points: u32) -> Result<(), StoreError> {
        self.scores
            .update(&self.manager, player, |score| Some(score.map_or(points, |s| *s + points)))?;
        Ok(())
    }

    fn print(&self) -> Result<(), StoreError> {
        println!("\nSCORES:");
        for (player, score) in self.scores.get_all(&self.manager)? {
            println!("{}: {}", player, score);
        }
        if let Some(leader) = self.leader.get(&self.manager)? {
            println!("Leader: {}", leader);
        }
        Ok(())
    }
}
