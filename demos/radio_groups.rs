use sovran_store::{
    ElementKind, GuiElement, OptionSets, Recursion, StoreError, StoreManager,
};
use std::cell::Cell;
use std::rc::Rc;

/// A stand-in for a host GUI element handle
#[derive(Clone)]
struct Widget {
    name: &'static str,
    kind: ElementKind,
    player: &'static str,
    state: Rc<Cell<bool>>,
    children: Vec<Widget>,
}

impl Widget {
    fn radio(name: &'static str, player: &'static str) -> Self {
        Self {
            name,
            kind: ElementKind::RadioButton,
            player,
            state: Rc::new(Cell::new(false)),
            children: Vec::new(),
        }
    }

    fn frame(name: &'static str, player: &'static str, children: Vec<Widget>) -> Self {
        Self {
            name,
            kind: ElementKind::Other,
            player,
            state: Rc::new(Cell::new(false)),
            children,
        }
    }
}

impl GuiElement for Widget {
    fn name(&self) -> String {
        self.name.to_string()
    }

    fn kind(&self) -> ElementKind {
        self.kind
    }

    fn children(&self) -> Vec<Self> {
        self.children.clone()
    }

    fn set_state(&self, state: bool) {
        self.state.set(state);
    }
}

/// Demonstrates per-player radio button groups backed by an option set
fn main() -> Result<(), StoreError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sovran_store=debug")),
        )
        .init();

    let manager = StoreManager::new();
    let mut sets = OptionSets::<Widget>::new();

    // One selection per player
    sets.new_categorized_option_set(
        &manager,
        "quality",
        |_, selected, player| {
            println!(
                "{} picked {}",
                player.unwrap_or("nobody"),
                selected.unwrap_or("nothing")
            );
            Ok(())
        },
        |widget: &Widget| widget.player.to_string(),
    )?;
    for (member, option) in [
        ("quality_low", "low"),
        ("quality_medium", "medium"),
        ("quality_high", "high"),
    ] {
        let added = sets.add_as_option(&manager, member, "quality", Some(option))?;
        added.watch(&manager, move |_, state, player| {
            println!("  [{}] {} -> {}", player.unwrap_or("-"), member, state);
            Ok(())
        })?;
    }
    manager.finish_setup()?;

    // Host events: radio buttons toggled by two players
    sets.handle_state_changed(&manager, &Widget::radio("quality_high", "alice"), true)?;
    sets.handle_state_changed(&manager, &Widget::radio("quality_low", "bob"), true)?;
    sets.handle_state_changed(&manager, &Widget::radio("quality_medium", "alice"), true)?;

    // Reset alice's panel, keeping "low" checked
    let panel = Widget::frame(
        "settings",
        "alice",
        vec![Widget::frame(
            "quality_flow",
            "alice",
            vec![
                Widget::radio("quality_low", "alice"),
                Widget::radio("quality_medium", "alice"),
                Widget::radio("quality_high", "alice"),
            ],
        )],
    );
    println!("\nResetting alice's panel:");
    sets.reset_all(&manager, &panel, &["quality_low"], Recursion::Depth(1))?;

    let quality = sets
        .option_set("quality")
        .ok_or_else(|| StoreError::UnknownMember("quality".to_string()))?;
    println!(
        "\nalice: {:?}, bob: {:?}",
        quality.selected(&manager, Some("alice"))?,
        quality.selected(&manager, Some("bob"))?
    );

    Ok(())
}
