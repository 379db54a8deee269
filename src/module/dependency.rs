//! 模块依赖排序
//!
//! 本模块根据模块声明的需求与能力构建依赖图，并给出安全的启动顺序。
//!
//! # 主要组件
//!
//! - [`DependencyGraph`] - 依赖关系图，按插入顺序保存节点与边
//! - [`requirement_sort`] - 按需求→能力关系对一批模块做拓扑排序
//!
//! # 示例
//!
//! ```rust
//! use chips_features::module::dependency::DependencyGraph;
//! use chips_features::module::ModuleId;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_dependency(ModuleId(1), ModuleId(2));
//!
//! assert_eq!(graph.start_order(), vec![ModuleId(2), ModuleId(1)]);
//! assert!(!graph.has_cycle());
//! ```

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::module::metadata::{Module, ModuleId};

/// 模块依赖关系图
///
/// 边 `a -> b` 表示 `a` 依赖 `b`。节点与边都保留插入顺序，
/// 因此排序结果是确定的。
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// 节点插入顺序
    nodes: Vec<ModuleId>,
    /// 模块 -> 该模块依赖的模块列表
    edges: HashMap<ModuleId, Vec<ModuleId>>,
}

impl DependencyGraph {
    /// 创建一个空的依赖图
    pub fn new() -> Self {
        Self::default()
    }

    /// 根据需求与能力构建依赖图
    ///
    /// 对每个模块的每条需求，在集合内按顺序寻找第一个提供匹配能力的
    /// 其他模块，并添加一条依赖边。集合之外的提供方被忽略。
    pub fn from_modules(modules: &[Module]) -> Self {
        let mut graph = Self::new();
        for module in modules {
            graph.add_module(module.id);
        }
        for module in modules {
            for requirement in &module.requirements {
                let provider = modules
                    .iter()
                    .find(|candidate| candidate.id != module.id && candidate.provides(requirement));
                if let Some(provider) = provider {
                    graph.add_dependency(module.id, provider.id);
                }
            }
        }
        graph
    }

    /// 添加模块节点到图中
    ///
    /// 如果模块已存在，则不会重复添加。
    pub fn add_module(&mut self, id: ModuleId) {
        if !self.edges.contains_key(&id) {
            self.nodes.push(id);
            self.edges.insert(id, Vec::new());
        }
    }

    /// 添加依赖关系：`module` 依赖于 `dependency`
    ///
    /// 如果模块不存在，会自动添加。
    pub fn add_dependency(&mut self, module: ModuleId, dependency: ModuleId) {
        self.add_module(module);
        self.add_module(dependency);

        let deps = self.edges.entry(module).or_default();
        if !deps.contains(&dependency) {
            deps.push(dependency);
        }
    }

    /// 模块的直接依赖，按添加顺序
    pub fn dependencies(&self, id: ModuleId) -> &[ModuleId] {
        self.edges.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 检测是否存在循环依赖
    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// 查找一条循环依赖路径
    ///
    /// 返回的路径首尾相同，例如 `[a, b, a]`。
    pub fn find_cycle(&self) -> Option<Vec<ModuleId>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for node in &self.nodes {
            if let Some(cycle) = self.find_cycle_util(*node, &mut visited, &mut rec_stack, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn find_cycle_util(
        &self,
        node: ModuleId,
        visited: &mut HashSet<ModuleId>,
        rec_stack: &mut HashSet<ModuleId>,
        path: &mut Vec<ModuleId>,
    ) -> Option<Vec<ModuleId>> {
        if rec_stack.contains(&node) {
            let start = path.iter().position(|n| *n == node).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(node);
            return Some(cycle);
        }
        if !visited.insert(node) {
            return None;
        }

        rec_stack.insert(node);
        path.push(node);
        for neighbor in self.dependencies(node) {
            if let Some(cycle) = self.find_cycle_util(*neighbor, visited, rec_stack, path) {
                return Some(cycle);
            }
        }
        path.pop();
        rec_stack.remove(&node);
        None
    }

    /// 启动顺序：依赖先于依赖者
    ///
    /// 深度优先后序遍历。进入节点时即标记为已访问，
    /// 环上回到祖先节点时视为没有未满足的依赖，从而打断循环。
    pub fn start_order(&self) -> Vec<ModuleId> {
        let mut visited = HashSet::new();
        let mut sorted = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            self.visit(*node, &mut visited, &mut sorted);
        }
        sorted
    }

    fn visit(&self, node: ModuleId, visited: &mut HashSet<ModuleId>, sorted: &mut Vec<ModuleId>) {
        if !visited.insert(node) {
            return;
        }
        for dependency in self.dependencies(node) {
            self.visit(*dependency, visited, sorted);
        }
        sorted.push(node);
    }
}

/// 按需求→能力关系排序模块，提供方在前
///
/// 循环依赖不会报错，只在调试日志中记录。
pub fn requirement_sort(modules: &[Module]) -> Vec<Module> {
    let graph = DependencyGraph::from_modules(modules);
    if let Some(cycle) = graph.find_cycle() {
        debug!(cycle = ?cycle, "启动顺序中存在循环依赖，按访问顺序打断");
    }

    let by_id: HashMap<ModuleId, &Module> = modules.iter().map(|m| (m.id, m)).collect();
    graph
        .start_order()
        .into_iter()
        .filter_map(|id| by_id.get(&id).map(|m| (*m).clone()))
        .collect()
}
