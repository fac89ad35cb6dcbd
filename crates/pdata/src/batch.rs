// SPDX-License-Identifier: Apache-2.0

//! Metric batches grouped by resource and scope.

use crate::InstrumentationScope;
use crate::point::{AttributeSet, MetricPoint};
use serde::{Deserialize, Serialize};

/// Points recorded by one instrumentation scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeMetrics {
    /// The recording scope.
    pub scope: InstrumentationScope,
    /// Points in upstream order.
    pub points: Vec<MetricPoint>,
}

/// Points produced by one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    /// Resource attributes (host, process identity, priority tag).
    pub resource: AttributeSet,
    /// Scopes in upstream order.
    pub scopes: Vec<ScopeMetrics>,
}

/// A batch of metric points preserving resource/scope grouping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricBatch {
    /// Resource groups in upstream order.
    pub resources: Vec<ResourceMetrics>,
}

impl MetricBatch {
    /// Creates an empty batch.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            resources: Vec::new(),
        }
    }

    /// Returns the total number of points across all groups.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.resources
            .iter()
            .flat_map(|r| r.scopes.iter())
            .map(|s| s.points.len())
            .sum()
    }

    /// Returns true when the batch carries no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.point_count() == 0
    }

    /// Iterates over `(resource, scope, point)` triples in upstream order.
    pub fn iter_points(
        &self,
    ) -> impl Iterator<Item = (&AttributeSet, &InstrumentationScope, &MetricPoint)> {
        self.resources.iter().flat_map(|r| {
            r.scopes
                .iter()
                .flat_map(move |s| s.points.iter().map(move |p| (&r.resource, &s.scope, p)))
        })
    }

    /// Applies `f` to every resource group.
    pub fn for_each_resource_mut(&mut self, mut f: impl FnMut(&mut ResourceMetrics)) {
        for resource in &mut self.resources {
            f(resource);
        }
    }

    /// Splits the batch into `(matched, rest)` according to `pred`, evaluated
    /// per point against the owning resource attributes.
    ///
    /// Resource and scope shells are cloned into whichever side receives at
    /// least one point; empty shells are not produced. Point order within a
    /// scope is preserved on both sides.
    #[must_use]
    pub fn partition(
        self,
        mut pred: impl FnMut(&AttributeSet, &MetricPoint) -> bool,
    ) -> (MetricBatch, MetricBatch) {
        let mut matched = MetricBatch::new();
        let mut rest = MetricBatch::new();

        for resource_group in self.resources {
            let resource = resource_group.resource;
            let mut matched_scopes: Vec<ScopeMetrics> = Vec::new();
            let mut rest_scopes: Vec<ScopeMetrics> = Vec::new();

            for scope_group in resource_group.scopes {
                let scope = scope_group.scope;
                let mut matched_points = Vec::new();
                let mut rest_points = Vec::new();
                for point in scope_group.points {
                    if pred(&resource, &point) {
                        matched_points.push(point);
                    } else {
                        rest_points.push(point);
                    }
                }
                if !matched_points.is_empty() {
                    matched_scopes.push(ScopeMetrics {
                        scope: scope.clone(),
                        points: matched_points,
                    });
                }
                if !rest_points.is_empty() {
                    rest_scopes.push(ScopeMetrics {
                        scope,
                        points: rest_points,
                    });
                }
            }

            if !matched_scopes.is_empty() {
                matched.resources.push(ResourceMetrics {
                    resource: resource.clone(),
                    scopes: matched_scopes,
                });
            }
            if !rest_scopes.is_empty() {
                rest.resources.push(ResourceMetrics {
                    resource,
                    scopes: rest_scopes,
                });
            }
        }

        (matched, rest)
    }

    /// Appends a point under the given resource and scope, reusing an existing
    /// group when one with equal resource attributes and scope is present.
    pub fn push_point(
        &mut self,
        resource: AttributeSet,
        scope: InstrumentationScope,
        point: MetricPoint,
    ) {
        let resource_group = match self
            .resources
            .iter_mut()
            .position(|r| r.resource == resource)
        {
            Some(idx) => &mut self.resources[idx],
            None => {
                self.resources.push(ResourceMetrics {
                    resource,
                    scopes: Vec::new(),
                });
                self.resources.last_mut().expect("group pushed above")
            }
        };

        let scope_group = match resource_group.scopes.iter_mut().position(|s| s.scope == scope) {
            Some(idx) => &mut resource_group.scopes[idx],
            None => {
                resource_group.scopes.push(ScopeMetrics {
                    scope,
                    points: Vec::new(),
                });
                resource_group.scopes.last_mut().expect("group pushed above")
            }
        };

        scope_group.points.push(point);
    }

    /// Moves all groups of `other` into this batch, merging equal shells.
    pub fn merge(&mut self, other: MetricBatch) {
        for resource_group in other.resources {
            for scope_group in resource_group.scopes {
                for point in scope_group.points {
                    self.push_point(
                        resource_group.resource.clone(),
                        scope_group.scope.clone(),
                        point,
                    );
                }
            }
        }
    }

    /// Returns the value of the last point named `metric_name`, widened to
    /// `f64`, scanning in upstream order. Used for KPI extraction.
    #[must_use]
    pub fn last_value_of(&self, metric_name: &str) -> Option<f64> {
        self.iter_points()
            .filter(|(_, _, p)| p.name == metric_name)
            .last()
            .map(|(_, _, p)| p.value.as_f64())
    }
}
