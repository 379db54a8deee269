//! 刷新集合计算
//!
//! 以被删除与被更新的模块为种子，沿旧布线与新解析结果做不动点扩展，
//! 找出所有布线可能改变的已安装模块。

use std::collections::{BTreeSet, HashMap};

use super::options::DeployOptions;
use super::plan::Deployment;
use crate::feature::resolver::{Resolution, ResourceRef};
use crate::module::metadata::{Module, ModuleId, ModuleWire};

/// 计算刷新集合
///
/// `old_wiring` 只包含当前已解析模块的需求布线。一个模块在下列任一情况下加入集合：
/// 旧布线的提供方已在集合中；新解析结果把它连到集合中的模块，
/// 或连到一个尚无对应模块的资源。
pub fn compute_refresh_set(
    deployment: &Deployment,
    installed: &[Module],
    old_wiring: &HashMap<ModuleId, Vec<ModuleWire>>,
    resolution: &Resolution,
    managed: &BTreeSet<ModuleId>,
    options: &DeployOptions,
) -> BTreeSet<ModuleId> {
    let mut to_refresh: BTreeSet<ModuleId> = deployment
        .to_delete
        .iter()
        .chain(deployment.to_update.keys())
        .copied()
        .collect();

    if !options.no_refresh_managed {
        loop {
            let size = to_refresh.len();
            for module in installed {
                if to_refresh.contains(&module.id) {
                    continue;
                }
                let Some(wires) = old_wiring.get(&module.id) else {
                    continue;
                };

                let wired_to_refreshed = wires.iter().any(|w| to_refresh.contains(&w.provider));
                if wired_to_refreshed || rewired(module.id, deployment, resolution, &to_refresh) {
                    to_refresh.insert(module.id);
                }
            }
            if to_refresh.len() == size {
                break;
            }
        }
    }

    if options.no_refresh_unmanaged {
        to_refresh.retain(|id| managed.contains(id));
    }
    to_refresh
}

fn rewired(
    id: ModuleId,
    deployment: &Deployment,
    resolution: &Resolution,
    to_refresh: &BTreeSet<ModuleId>,
) -> bool {
    let Some(new_wires) = resolution.wires_of(&ResourceRef::Installed(id)) else {
        return false;
    };
    new_wires.iter().any(|wire| {
        let provider = match &wire.provider {
            ResourceRef::Installed(module) => Some(*module),
            ResourceRef::Candidate(resource) => deployment.resource_to_module.get(resource).copied(),
        };
        match provider {
            Some(module) => to_refresh.contains(&module),
            None => true,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::resolver::{Resource, ResourceId, Wire};
    use crate::module::version::parse_version;

    fn module(id: u64, name: &str) -> Module {
        Module::new(id, name, parse_version("1.0").unwrap(), format!("mvn:org/{name}/1.0"))
    }

    fn wired(pairs: &[(u64, u64)]) -> HashMap<ModuleId, Vec<ModuleWire>> {
        let mut wiring: HashMap<ModuleId, Vec<ModuleWire>> = HashMap::new();
        for (requirer, provider) in pairs {
            wiring
                .entry(ModuleId(*requirer))
                .or_default()
                .push(ModuleWire::new(ModuleId(*requirer), ModuleId(*provider), "package"));
        }
        wiring
    }

    fn updating(id: u64) -> Deployment {
        let mut deployment = Deployment::default();
        deployment.to_update.insert(
            ModuleId(id),
            Resource::module("c", parse_version("1.0").unwrap(), "mvn:org/c/1.0"),
        );
        deployment
    }

    fn ids(set: &BTreeSet<ModuleId>) -> Vec<u64> {
        set.iter().map(|id| id.0).collect()
    }

    #[test]
    fn test_chain_closure() {
        // A(1) -> B(2) -> C(3)，C 被更新
        let installed = vec![module(1, "a"), module(2, "b"), module(3, "c"), module(4, "d")];
        let mut wiring = wired(&[(1, 2), (2, 3)]);
        wiring.insert(ModuleId(4), Vec::new());

        let set = compute_refresh_set(
            &updating(3),
            &installed,
            &wiring,
            &Resolution::default(),
            &BTreeSet::new(),
            &DeployOptions::default(),
        );
        assert_eq!(ids(&set), vec![1, 2, 3]);
    }

    #[test]
    fn test_unresolved_modules_skipped() {
        let installed = vec![module(1, "a"), module(3, "c")];
        // 1 没有布线信息（未解析）
        let set = compute_refresh_set(
            &updating(3),
            &installed,
            &HashMap::new(),
            &Resolution::default(),
            &BTreeSet::new(),
            &DeployOptions::default(),
        );
        assert_eq!(ids(&set), vec![3]);
    }

    #[test]
    fn test_new_wiring_to_unassigned_resource() {
        let installed = vec![module(1, "a"), module(2, "b")];
        let mut wiring = wired(&[(1, 2)]);
        wiring.insert(ModuleId(2), Vec::new());
        let mut resolution = Resolution::default();
        resolution.add_wire(
            ResourceRef::Installed(ModuleId(2)),
            Wire::new("package", ResourceRef::Candidate(ResourceId::new("mvn:org/new/1.0"))),
        );

        let set = compute_refresh_set(
            &Deployment::default(),
            &installed,
            &wiring,
            &resolution,
            &BTreeSet::new(),
            &DeployOptions::default(),
        );
        // 2 连到了一个新资源，1 依赖 2
        assert_eq!(ids(&set), vec![1, 2]);
    }

    #[test]
    fn test_new_wiring_to_matched_resource_is_stable() {
        let installed = vec![module(1, "a"), module(2, "b")];
        let wiring = wired(&[(1, 2)]);
        let mut deployment = Deployment::default();
        deployment
            .resource_to_module
            .insert(ResourceId::new("mvn:org/b/1.0"), ModuleId(2));
        let mut resolution = Resolution::default();
        resolution.add_wire(
            ResourceRef::Installed(ModuleId(1)),
            Wire::new("package", ResourceRef::Candidate(ResourceId::new("mvn:org/b/1.0"))),
        );

        let set = compute_refresh_set(
            &deployment,
            &installed,
            &wiring,
            &resolution,
            &BTreeSet::new(),
            &DeployOptions::default(),
        );
        assert!(set.is_empty());
    }

    #[test]
    fn test_narrowing_options() {
        let installed = vec![module(1, "a"), module(2, "b"), module(3, "c")];
        let wiring = wired(&[(1, 2), (2, 3)]);
        let managed: BTreeSet<ModuleId> = [ModuleId(1), ModuleId(3)].into_iter().collect();

        let unmanaged_excluded = compute_refresh_set(
            &updating(3),
            &installed,
            &wiring,
            &Resolution::default(),
            &managed,
            &DeployOptions::new().no_refresh_unmanaged(),
        );
        assert_eq!(ids(&unmanaged_excluded), vec![1, 3]);

        let seed_only = compute_refresh_set(
            &updating(3),
            &installed,
            &wiring,
            &Resolution::default(),
            &managed,
            &DeployOptions::new().no_refresh_managed(),
        );
        assert_eq!(ids(&seed_only), vec![3]);
    }
}
