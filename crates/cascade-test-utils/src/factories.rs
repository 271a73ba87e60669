//! Small builders for coordinator test data.

use cascade_coordinator::CatalogNode;

/// A catalog node registered under `cascade` with the given role tags.
pub fn catalog_node(name: &str, tags: &[&str]) -> CatalogNode {
    CatalogNode {
        node: name.to_string(),
        address: format!("10.1.0.{}", name.as_bytes().iter().map(|b| *b as u32).sum::<u32>() % 250 + 1),
        service_tags: tags.iter().map(|t| t.to_string()).collect(),
        service_port: 0,
    }
}

/// JSON payload of a `cascade.cm` reply event.
pub fn reply_payload(source: &str, msg: &str, ref_id: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "source": source,
        "msg": msg,
        "ref": ref_id,
    }))
    .expect("reply payload is always serializable")
}
