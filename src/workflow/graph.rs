//! 阶段依赖图
//!
//! 使用邻接表和入度表做拓扑排序（Kahn）；构造时检查未知依赖与环，
//! 并校验执行计划没有把阶段排在它的依赖之前。

use std::collections::{BTreeMap, VecDeque};

use crate::core::StageId;
use crate::workflow::types::{dependencies, DepKind, Dependency, GroupMode, Plan, WorkflowError};

/// 计划内阶段的依赖图
#[derive(Debug)]
pub struct StageGraph {
    /// 邻接表：阶段 -> 依赖它的阶段
    pub adjacency: BTreeMap<StageId, Vec<StageId>>,
    /// 入度表：阶段 -> 计划内依赖数
    pub in_degree: BTreeMap<StageId, usize>,
}

impl StageGraph {
    /// 按内置依赖表构图
    pub fn new(stages: &[StageId]) -> Result<Self, WorkflowError> {
        Self::with_rules(stages, dependencies)
    }

    /// 自定义依赖规则构图
    ///
    /// 计划外的 Optional 依赖直接从已有状态读取，不入图；
    /// 计划外的 Required 依赖视为未知依赖。
    pub fn with_rules(
        stages: &[StageId],
        rules: impl Fn(StageId) -> Vec<Dependency>,
    ) -> Result<Self, WorkflowError> {
        let mut adjacency: BTreeMap<StageId, Vec<StageId>> = BTreeMap::new();
        let mut in_degree: BTreeMap<StageId, usize> = BTreeMap::new();

        for stage in stages {
            adjacency.entry(*stage).or_default();
            in_degree.entry(*stage).or_insert(0);
        }

        for stage in stages {
            for dep in rules(*stage) {
                if !in_degree.contains_key(&dep.stage) {
                    if dep.kind == DepKind::Required {
                        return Err(WorkflowError::UnknownDependency {
                            stage: *stage,
                            dependency: dep.stage,
                        });
                    }
                    continue;
                }
                adjacency.entry(dep.stage).or_default().push(*stage);
                *in_degree.entry(*stage).or_insert(0) += 1;
            }
        }

        let graph = Self { adjacency, in_degree };
        graph.topological_order()?;
        Ok(graph)
    }

    /// Kahn 拓扑序；存在环时报错
    pub fn topological_order(&self) -> Result<Vec<StageId>, WorkflowError> {
        let mut degree = self.in_degree.clone();
        let mut ready: VecDeque<StageId> = degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(s, _)| *s)
            .collect();
        let mut order = Vec::with_capacity(degree.len());

        while let Some(stage) = ready.pop_front() {
            order.push(stage);
            for next in self.adjacency.get(&stage).into_iter().flatten() {
                if let Some(d) = degree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(*next);
                    }
                }
            }
        }

        if order.len() != degree.len() {
            return Err(WorkflowError::CyclicDependency);
        }
        Ok(order)
    }

    /// 校验计划：每个阶段的计划内依赖都在更早的组里，或在同一顺序组中排在它前面
    pub fn validate_plan(plan: &Plan) -> Result<Self, WorkflowError> {
        let stages = plan.stages();
        let mut seen = std::collections::HashSet::new();
        for stage in &stages {
            if !seen.insert(*stage) {
                return Err(WorkflowError::InvalidConfiguration(format!(
                    "{stage} is scheduled more than once"
                )));
            }
        }

        let graph = Self::new(&stages)?;
        let position: BTreeMap<StageId, (usize, usize)> = plan
            .groups
            .iter()
            .enumerate()
            .flat_map(|(g, group)| group.stages.iter().enumerate().map(move |(i, s)| (*s, (g, i))))
            .collect();

        for (dep, dependents) in &graph.adjacency {
            let (dep_group, dep_index) = position[dep];
            for stage in dependents {
                let (group, index) = position[stage];
                let ordered = dep_group < group
                    || (dep_group == group
                        && plan.groups[group].mode == GroupMode::Sequential
                        && dep_index < index);
                if !ordered {
                    return Err(WorkflowError::InvalidConfiguration(format!(
                        "{stage} is scheduled before or alongside its dependency {dep}"
                    )));
                }
            }
        }
        Ok(graph)
    }
}
