use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use reminder_core::{
    models::{Destination, MessageRecord, TagRoute},
    traits::TagRouteRepository,
    ReminderResult,
};

/// 按标签路由筛选推送目标
///
/// 消息没有标签时不筛选；有标签但没有匹配的启用路由时同样不筛选，
/// 只有命中路由才把目标收窄到路由引用的目标集合。
pub struct FanoutRouter {
    routes: Arc<dyn TagRouteRepository>,
}

impl FanoutRouter {
    pub fn new(routes: Arc<dyn TagRouteRepository>) -> Self {
        Self { routes }
    }

    pub async fn filter(
        &self,
        message: &MessageRecord,
        destinations: Vec<Destination>,
    ) -> ReminderResult<Vec<Destination>> {
        if message.tags.is_empty() {
            return Ok(destinations);
        }
        let routes = self.routes.list_enabled_by_owner(message.owner_id).await?;
        Ok(apply_tag_routes(&message.tags, &routes, destinations))
    }
}

pub fn apply_tag_routes(
    tags: &[String],
    routes: &[TagRoute],
    destinations: Vec<Destination>,
) -> Vec<Destination> {
    if tags.is_empty() {
        return destinations;
    }

    let allowed: HashSet<i64> = routes
        .iter()
        .filter(|route| route.enabled && tags.contains(&route.tag_name))
        .flat_map(|route| route.destination_ids.iter().copied())
        .collect();

    if allowed.is_empty() {
        debug!("标签未匹配任何路由，推送到全部目标: tags={:?}", tags);
        return destinations;
    }

    destinations
        .into_iter()
        .filter(|d| allowed.contains(&d.id))
        .collect()
}

/// 请求指定了平台子集时，只保留这些平台的目标
pub fn restrict_platforms(requested: &[String], destinations: Vec<Destination>) -> Vec<Destination> {
    if requested.is_empty() {
        return destinations;
    }
    destinations
        .into_iter()
        .filter(|d| {
            requested
                .iter()
                .any(|p| p.trim().eq_ignore_ascii_case(d.platform.trim()))
        })
        .collect()
}
