//! 批量启停顺序
//!
//! 停止时先停最高启动级别的模块，同一级别内按服务使用关系分批：
//! 优先停止没有被待停模块使用的模块。启动时从最低启动级别开始，
//! 同一级别内按需求→能力拓扑排序，编排者自身的模块总是最后启动。

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::module::dependency::requirement_sort;
use crate::module::metadata::{Module, ModuleId, ServiceReference, DEFAULT_START_LEVEL};

/// 过滤出需要显式停止的模块（去掉片段与已停止/停止中的模块）
pub fn stoppable(ids: impl IntoIterator<Item = ModuleId>, modules: &HashMap<ModuleId, Module>) -> BTreeSet<ModuleId> {
    ids.into_iter()
        .filter(|id| modules.get(id).map(Module::is_stoppable).unwrap_or(false))
        .collect()
}

/// 过滤出需要显式启动的模块（去掉片段与已运行/启动中的模块）
pub fn startable(ids: impl IntoIterator<Item = ModuleId>, modules: &HashMap<ModuleId, Module>) -> BTreeSet<ModuleId> {
    ids.into_iter()
        .filter(|id| modules.get(id).map(Module::is_startable).unwrap_or(false))
        .collect()
}

fn usage(reference: &ServiceReference, pending: &BTreeSet<ModuleId>) -> usize {
    reference
        .using
        .iter()
        .filter(|user| **user != reference.owner && pending.contains(user))
        .count()
}

/// 启动级别，不在模块表中的模块视为默认级别
fn level_of(id: &ModuleId, modules: &HashMap<ModuleId, Module>) -> u32 {
    modules
        .get(id)
        .map_or(DEFAULT_START_LEVEL, |m| m.start_level)
}

/// 选择下一批可以停止的模块
///
/// 只在最高启动级别的待停模块中挑选。注册的服务没有被其他待停模块使用的模块
/// 全部入选，按最后修改时间从新到旧排列；若不存在这样的模块，则只选出提供
/// 排序最低的在用服务的那个模块，保证循环使用下仍能推进。返回值总是 `pending` 的子集。
pub fn select_stop_batch(
    pending: &BTreeSet<ModuleId>,
    modules: &HashMap<ModuleId, Module>,
    services: &HashMap<ModuleId, Vec<ServiceReference>>,
) -> Vec<ModuleId> {
    let no_services = Vec::new();
    let registered = |id: &ModuleId| services.get(id).unwrap_or(&no_services);

    let Some(top) = pending.iter().map(|id| level_of(id, modules)).max() else {
        return Vec::new();
    };
    let candidates: BTreeSet<ModuleId> = pending
        .iter()
        .filter(|id| level_of(id, modules) == top)
        .copied()
        .collect();

    let mut unused: Vec<ModuleId> = candidates
        .iter()
        .filter(|id| {
            let total: usize = registered(id).iter().map(|r| usage(r, &candidates)).sum();
            debug!(module_id = %id, usage = total, "模块服务使用数");
            total == 0
        })
        .copied()
        .collect();

    if !unused.is_empty() {
        unused.sort_by(|a, b| {
            let modified = |id: &ModuleId| modules.get(id).map(|m| m.last_modified);
            modified(b).cmp(&modified(a)).then_with(|| a.cmp(b))
        });
        return unused;
    }

    let lowest = candidates
        .iter()
        .flat_map(|id| registered(id).iter().map(move |r| (*id, r)))
        .filter(|(_, r)| usage(r, &candidates) > 0)
        .min_by(|(_, a), (_, b)| a.cmp(b));
    match lowest {
        Some((id, reference)) => {
            debug!(module_id = %id, service_id = reference.id, "按最低排名服务选择停止模块");
            vec![id]
        }
        None => candidates.into_iter().collect(),
    }
}

/// 启动顺序：低启动级别在前，同级内提供方在前，`owner` 总是最后
pub fn start_order(
    pending: &BTreeSet<ModuleId>,
    modules: &HashMap<ModuleId, Module>,
    owner: Option<ModuleId>,
) -> Vec<ModuleId> {
    let restart_owner = owner.filter(|id| pending.contains(id));
    let mut levels: BTreeMap<u32, Vec<Module>> = BTreeMap::new();
    for module in pending
        .iter()
        .filter(|id| Some(**id) != restart_owner)
        .filter_map(|id| modules.get(id))
    {
        levels.entry(module.start_level).or_default().push(module.clone());
    }

    let mut order: Vec<ModuleId> = levels
        .values()
        .flat_map(|batch| requirement_sort(batch))
        .map(|m| m.id)
        .collect();
    if let Some(owner) = restart_owner {
        order.push(owner);
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::metadata::{Capability, ModuleState, Requirement};
    use crate::module::version::parse_version;
    use chrono::{Duration, Utc};

    fn module(id: u64, age_secs: i64) -> Module {
        let mut m = Module::new(id, format!("m{id}"), parse_version("1.0").unwrap(), format!("mvn:m{id}"));
        m.state = ModuleState::Active;
        m.last_modified = Utc::now() - Duration::seconds(age_secs);
        m
    }

    fn table(modules: Vec<Module>) -> HashMap<ModuleId, Module> {
        modules.into_iter().map(|m| (m.id, m)).collect()
    }

    fn service(id: u64, owner: u64, ranking: i32, using: &[u64]) -> ServiceReference {
        ServiceReference {
            id,
            owner: ModuleId(owner),
            ranking,
            using: using.iter().map(|u| ModuleId(*u)).collect(),
        }
    }

    fn at_level(mut m: Module, level: u32) -> Module {
        m.start_level = level;
        m
    }

    fn pending(ids: &[u64]) -> BTreeSet<ModuleId> {
        ids.iter().map(|id| ModuleId(*id)).collect()
    }

    #[test]
    fn test_unused_first_newest_first() {
        let modules = table(vec![module(1, 100), module(2, 10), module(3, 50)]);
        let mut services = HashMap::new();
        // 1 提供被 2 使用的服务
        services.insert(ModuleId(1), vec![service(10, 1, 0, &[2])]);

        let batch = select_stop_batch(&pending(&[1, 2, 3]), &modules, &services);
        assert_eq!(batch, vec![ModuleId(2), ModuleId(3)]);

        let next = select_stop_batch(&pending(&[1]), &modules, &services);
        assert_eq!(next, vec![ModuleId(1)]);
    }

    #[test]
    fn test_usage_outside_pending_set_ignored() {
        let modules = table(vec![module(1, 0)]);
        let mut services = HashMap::new();
        services.insert(ModuleId(1), vec![service(10, 1, 0, &[99, 1])]);
        assert_eq!(select_stop_batch(&pending(&[1]), &modules, &services), vec![ModuleId(1)]);
    }

    #[test]
    fn test_circular_usage_picks_lowest_ranked() {
        let modules = table(vec![module(1, 0), module(2, 0)]);
        let mut services = HashMap::new();
        services.insert(ModuleId(1), vec![service(10, 1, 5, &[2])]);
        services.insert(ModuleId(2), vec![service(11, 2, 1, &[1])]);

        let batch = select_stop_batch(&pending(&[1, 2]), &modules, &services);
        assert_eq!(batch, vec![ModuleId(2)]);
    }

    #[test]
    fn test_highest_start_level_stops_first() {
        let modules = table(vec![at_level(module(1, 0), 80), at_level(module(2, 100), 20)]);
        let services = HashMap::new();

        assert_eq!(select_stop_batch(&pending(&[1, 2]), &modules, &services), vec![ModuleId(1)]);
        assert_eq!(select_stop_batch(&pending(&[2]), &modules, &services), vec![ModuleId(2)]);
    }

    #[test]
    fn test_start_level_overrides_usage_when_stopping() {
        // 2 使用 1 的服务，但 1 的启动级别更高
        let modules = table(vec![at_level(module(1, 0), 80), at_level(module(2, 0), 20)]);
        let mut services = HashMap::new();
        services.insert(ModuleId(1), vec![service(10, 1, 0, &[2])]);

        assert_eq!(select_stop_batch(&pending(&[1, 2]), &modules, &services), vec![ModuleId(1)]);
    }

    #[test]
    fn test_circular_fallback_stays_within_pending() {
        let modules = table(vec![module(1, 0), module(2, 0)]);
        let mut services = HashMap::new();
        // 运行时报告的注册者不在待停集合中
        services.insert(ModuleId(1), vec![service(10, 99, 0, &[2])]);
        services.insert(ModuleId(2), vec![service(11, 2, 5, &[1])]);

        let batch = select_stop_batch(&pending(&[1, 2]), &modules, &services);
        assert_eq!(batch, vec![ModuleId(1)]);
    }

    #[test]
    fn test_lowest_start_level_starts_first() {
        // 2 需要 1 提供的包，但 2 的启动级别更低
        let mut api = at_level(module(1, 0), 80);
        api.capabilities.push(Capability::new("package").with_attribute("package", "api"));
        let mut consumer = at_level(module(2, 0), 20);
        consumer
            .requirements
            .push(Requirement::new("package").with_filter("package", "api"));
        let mut peer = at_level(module(3, 0), 80);
        peer.requirements
            .push(Requirement::new("package").with_filter("package", "api"));
        let modules = table(vec![api, consumer, peer]);

        let order = start_order(&pending(&[1, 2, 3]), &modules, None);
        assert_eq!(order, vec![ModuleId(2), ModuleId(1), ModuleId(3)]);
    }

    #[test]
    fn test_state_filters() {
        let mut resolved = module(2, 0);
        resolved.state = ModuleState::Resolved;
        let mut fragment = module(3, 0);
        fragment.fragment = true;
        let modules = table(vec![module(1, 0), resolved, fragment]);

        assert_eq!(stoppable(pending(&[1, 2, 3, 4]), &modules), pending(&[1]));
        assert_eq!(startable(pending(&[1, 2, 3]), &modules), pending(&[2]));
    }

    #[test]
    fn test_owner_started_last() {
        let mut api = module(1, 0);
        api.capabilities.push(Capability::new("package").with_attribute("package", "api"));
        let mut owner = module(2, 0);
        owner.capabilities.push(Capability::new("package").with_attribute("package", "svc"));
        let mut consumer = module(3, 0);
        consumer
            .requirements
            .push(Requirement::new("package").with_filter("package", "api"));
        consumer
            .requirements
            .push(Requirement::new("package").with_filter("package", "svc"));
        let modules = table(vec![api, owner, consumer]);

        let order = start_order(&pending(&[1, 2, 3]), &modules, Some(ModuleId(2)));
        assert_eq!(order, vec![ModuleId(1), ModuleId(3), ModuleId(2)]);

        let order = start_order(&pending(&[1, 3]), &modules, Some(ModuleId(2)));
        assert_eq!(order, vec![ModuleId(1), ModuleId(3)]);
    }
}
