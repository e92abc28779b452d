// keys.rs — Print the key expressions a node would use.

use zrc_node::NodeConfig;

pub fn execute(config: &NodeConfig, topic: &str, service: &str, action: &str) -> anyhow::Result<()> {
    for (purpose, key) in layout(config, topic, service, action) {
        println!("{purpose:<16} {key}");
    }
    Ok(())
}

fn layout(
    config: &NodeConfig,
    topic: &str,
    service: &str,
    action: &str,
) -> Vec<(&'static str, String)> {
    let keys = config.key_layout();
    vec![
        ("topic", keys.topic(topic)),
        ("service", keys.service_request(service)),
        ("action goal", keys.action_goal(action)),
        ("action cancel", keys.action_cancel(action)),
        ("action feedback", keys.action_feedback(action, "<goal-id>")),
        ("action result", keys.action_result(action, "<goal-id>")),
    ]
}
