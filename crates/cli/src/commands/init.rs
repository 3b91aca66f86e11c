use std::path::Path;

use tether_resources::{load_catalog, Catalog};

use crate::print_json;
use crate::session::Session;

/// The schema is applied when the session opens; this only seeds.
pub(crate) async fn cmd_init(session: &Session, seed: Option<&Path>) {
    let Some(seed) = seed else {
        if session.json() {
            print_json(&serde_json::json!({ "initialized": true }));
        } else {
            session.say("database initialized");
        }
        return;
    };

    let catalog: Catalog = session.read_json(seed);
    let counts = session.expect_ok(load_catalog(&*session.ctx.gateway, &catalog).await);
    if session.json() {
        print_json(&serde_json::json!({ "initialized": true, "seeded": counts }));
    } else {
        session.say(&format!(
            "database initialized; seeded {} project(s), {} agent(s), {} rule(s), {} hook(s), {} dependency edge(s)",
            counts.projects, counts.agents, counts.rules, counts.hooks, counts.dependencies
        ));
    }
}
