//! 部署计划
//!
//! 对比解析得到的目标资源集与当前已安装模块，得出安装/更新/删除计划。

use std::collections::{BTreeMap, BTreeSet, HashMap};

use semver::Version;
use serde::Serialize;
use tracing::debug;

use super::options::UpdateSnapshots;
use crate::feature::resolver::{Resolution, Resource, ResourceId};
use crate::module::metadata::{Module, ModuleId};
use crate::module::version::RangeTemplate;
use crate::utils::checksum::checksum;
use crate::utils::Result;

/// 一次协调的部署计划
///
/// 每个托管模块至多出现在 `to_update` 与 `to_delete` 之一；
/// `to_install` 与 `to_update` 的资源互不相交，二者之并是全部可安装目标资源。
#[derive(Debug, Clone, Default)]
pub struct Deployment {
    /// 没有匹配模块、需要新装的资源
    pub to_install: Vec<Resource>,
    /// 原地替换：已有模块 -> 新资源
    pub to_update: BTreeMap<ModuleId, Resource>,
    /// 没有对应资源的托管模块
    pub to_delete: BTreeSet<ModuleId>,
    /// 资源 -> 已分配的模块
    pub resource_to_module: HashMap<ResourceId, ModuleId>,
    /// 位置 -> 新计算的校验和
    pub new_checksums: BTreeMap<String, u32>,
}

impl Deployment {
    /// 计划是否为空
    pub fn is_empty(&self) -> bool {
        self.to_install.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// 计划摘要
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            to_install: self
                .to_install
                .iter()
                .filter_map(|r| r.location.clone())
                .collect(),
            to_update: self
                .to_update
                .iter()
                .map(|(id, r)| (*id, r.location.clone().unwrap_or_default()))
                .collect(),
            to_delete: self.to_delete.iter().copied().collect(),
        }
    }
}

/// 计划摘要（用于报告与日志）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    /// 待安装位置
    pub to_install: Vec<String>,
    /// 待更新模块及新位置
    pub to_update: Vec<(ModuleId, String)>,
    /// 待删除模块
    pub to_delete: Vec<ModuleId>,
}

/// 可安装资源：只保留有位置的资源，同一位置后者覆盖前者，按位置排序
pub fn installable_resources(resources: &[Resource]) -> Vec<Resource> {
    let mut by_location: BTreeMap<&str, &Resource> = BTreeMap::new();
    for resource in resources {
        if let Some(location) = resource.location.as_deref() {
            by_location.insert(location, resource);
        }
    }
    by_location.into_values().cloned().collect()
}

/// 部署计划器
#[derive(Debug, Clone)]
pub struct DeploymentPlanner {
    policy: UpdateSnapshots,
    update_range: RangeTemplate,
    immutable_schemes: Vec<String>,
}

impl DeploymentPlanner {
    /// 创建计划器
    pub fn new(
        policy: UpdateSnapshots,
        update_range: RangeTemplate,
        immutable_schemes: Vec<String>,
    ) -> Self {
        Self {
            policy,
            update_range,
            immutable_schemes,
        }
    }

    /// 更新检测策略
    pub fn policy(&self) -> UpdateSnapshots {
        self.policy
    }

    /// 资源内容是否可能变化
    pub fn is_updateable(&self, resource: &Resource) -> bool {
        resource.is_updateable(&self.immutable_schemes)
    }

    /// 计算部署计划
    ///
    /// 校验和策略下会读取匹配模块的资源内容；读取失败时整个计划失败。
    pub async fn plan(
        &self,
        managed: &BTreeSet<ModuleId>,
        installed: &[Module],
        resolution: &Resolution,
        checksums: &BTreeMap<String, u32>,
    ) -> Result<Deployment> {
        let mut deployment = Deployment::default();
        let mut to_deploy = installable_resources(&resolution.resources);

        // 第一轮：已安装模块要么匹配到资源，要么（若托管）进入删除集合
        for module in installed {
            let Some(name) = module.symbolic_name.as_deref() else {
                continue;
            };
            if module.id.is_system() {
                continue;
            }

            let matched = to_deploy.iter().position(|r| {
                r.symbolic_name.as_deref() == Some(name) && r.version == module.version
            });
            match matched {
                Some(position) => {
                    let resource = to_deploy.remove(position);
                    if managed.contains(&module.id) && self.is_updateable(&resource) {
                        self.detect_update(module, &resource, resolution, checksums, &mut deployment)
                            .await?;
                    }
                    deployment
                        .resource_to_module
                        .insert(resource.id.clone(), module.id);
                }
                None if managed.contains(&module.id) => {
                    deployment.to_delete.insert(module.id);
                }
                None => {}
            }
        }

        // 第二轮：剩余资源优先复用兼容版本范围内的待删除模块
        let by_id: HashMap<ModuleId, &Module> = installed.iter().map(|m| (m.id, m)).collect();
        for resource in to_deploy {
            let range = self.update_range.expand(&resource.version);
            let mut matching: BTreeMap<Version, ModuleId> = BTreeMap::new();
            for id in &deployment.to_delete {
                let Some(module) = by_id.get(id) else { continue };
                if module.symbolic_name.is_some()
                    && module.symbolic_name == resource.symbolic_name
                    && range.includes(&module.version)
                {
                    matching.insert(module.version.clone(), *id);
                }
            }

            match matching.into_values().next_back() {
                Some(id) => {
                    debug!(module_id = %id, resource = %resource.display_name(), range = %range, "以更新代替删除与安装");
                    deployment.to_delete.remove(&id);
                    deployment.resource_to_module.insert(resource.id.clone(), id);
                    deployment.to_update.insert(id, resource);
                }
                None => deployment.to_install.push(resource),
            }
        }

        Ok(deployment)
    }

    async fn detect_update(
        &self,
        module: &Module,
        resource: &Resource,
        resolution: &Resolution,
        checksums: &BTreeMap<String, u32>,
        deployment: &mut Deployment,
    ) -> Result<()> {
        match self.policy {
            UpdateSnapshots::Always => {
                debug!(location = %module.location, "总是更新快照");
                deployment.to_update.insert(module.id, resource.clone());
            }
            UpdateSnapshots::Checksum => {
                let content = resolution.open(resource).await?;
                let new_sum = checksum(&content);
                let old_sum = checksums.get(&module.location).copied().unwrap_or(0);
                if new_sum != old_sum {
                    debug!(location = %module.location, old_sum, new_sum, "检测到新的快照内容");
                    deployment.to_update.insert(module.id, resource.clone());
                    deployment
                        .new_checksums
                        .insert(module.location.clone(), new_sum);
                }
            }
            UpdateSnapshots::None => {}
        }
        Ok(())
    }
}
