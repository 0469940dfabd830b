use std::{collections::BTreeMap, sync::Arc};

use gateway_config::{GroupConfig, UpstreamConfig};

/// Upstreams bucketed by routing priority, lowest (most preferred) first.
///
/// Built once at wiring and never mutated; insertion order within a bucket
/// is the round-robin order.
pub type PriorityToUpstreamsMap = BTreeMap<u32, Vec<Arc<UpstreamConfig>>>;

/// Buckets `upstreams` by the priority of their group.
///
/// An upstream whose group matches no configured group — including
/// ungrouped upstreams — lands at priority 0.
pub fn build_priority_map(
    upstreams: &[UpstreamConfig],
    groups: &[GroupConfig],
) -> PriorityToUpstreamsMap {
    let mut map = PriorityToUpstreamsMap::new();
    for upstream in upstreams {
        let priority = upstream
            .group
            .as_deref()
            .and_then(|group| groups.iter().find(|g| g.id == group))
            .map_or(0, |group| group.priority);
        map.entry(priority).or_default().push(Arc::new(upstream.clone()));
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(id: &str, group: Option<&str>) -> UpstreamConfig {
        UpstreamConfig {
            id: id.to_string(),
            http_url: format!("http://{id}:8545"),
            ws_url: None,
            group: group.map(str::to_string),
            node_type: Default::default(),
            basic_auth: None,
            methods: Default::default(),
            request_headers: Vec::new(),
            use_ws_for_block_height: false,
            skip_peer_count_check: false,
        }
    }

    fn group(id: &str, priority: u32) -> GroupConfig {
        GroupConfig { id: id.to_string(), priority }
    }

    #[test]
    fn buckets_by_group_priority_in_insertion_order() {
        let upstreams = [
            upstream("a", Some("fallback")),
            upstream("b", Some("primary")),
            upstream("c", Some("primary")),
        ];
        let groups = [group("primary", 0), group("fallback", 1)];

        let map = build_priority_map(&upstreams, &groups);
        assert_eq!(map.len(), 2);
        assert_eq!(
            map[&0].iter().map(|u| u.id.as_str()).collect::<Vec<_>>(),
            vec!["b", "c"]
        );
        assert_eq!(map[&1].iter().map(|u| u.id.as_str()).collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn unknown_or_missing_group_lands_at_priority_zero() {
        let upstreams = [upstream("a", None), upstream("b", Some("ghost"))];
        let map = build_priority_map(&upstreams, &[group("primary", 2)]);
        assert_eq!(
            map[&0].iter().map(|u| u.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }
}
