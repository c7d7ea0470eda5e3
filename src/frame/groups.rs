// Resource groups with declared dependencies
//
// Size-dependent GPU objects are rebuilt as a unit. Instead of a hand-written
// create/destroy call sequence, each group names the groups it depends on and
// the plan derives one build order. Teardown is always that order reversed.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("group {0} is declared twice")]
    Duplicate(String),

    #[error("group {group} depends on undeclared group {dependency}")]
    UnknownDependency { group: String, dependency: String },

    #[error("dependency cycle involving group {0}")]
    Cycle(String),
}

/// A bundle of objects that can be built and destroyed group by group
pub trait GroupSet {
    type Group: Copy;

    fn build(&mut self, group: Self::Group) -> anyhow::Result<()>;

    /// Must tolerate groups that were never built
    fn destroy(&mut self, group: Self::Group);
}

/// Dependency-ordered list of groups
#[derive(Debug, Clone)]
pub struct RebuildPlan<G> {
    order: Vec<G>,
}

impl<G: Copy + Eq + fmt::Debug> RebuildPlan<G> {
    /// Build a plan from `(group, dependencies)` declarations.
    ///
    /// The order is topological and stable: among groups that are ready,
    /// the one declared first comes first.
    pub fn new(declarations: &[(G, &[G])]) -> Result<Self, PlanError> {
        for (i, (group, deps)) in declarations.iter().enumerate() {
            if declarations[..i].iter().any(|(other, _)| other == group) {
                return Err(PlanError::Duplicate(format!("{:?}", group)));
            }
            for dep in deps.iter() {
                if !declarations.iter().any(|(other, _)| other == dep) {
                    return Err(PlanError::UnknownDependency {
                        group: format!("{:?}", group),
                        dependency: format!("{:?}", dep),
                    });
                }
            }
        }

        let mut order: Vec<G> = Vec::with_capacity(declarations.len());
        let mut placed = vec![false; declarations.len()];

        while order.len() < declarations.len() {
            let ready = declarations.iter().enumerate().find(|(i, (_, deps))| {
                !placed[*i] && deps.iter().all(|dep| order.contains(dep))
            });

            match ready {
                Some((i, (group, _))) => {
                    placed[i] = true;
                    order.push(*group);
                }
                None => {
                    let stuck = declarations
                        .iter()
                        .zip(&placed)
                        .find(|(_, &done)| !done)
                        .map(|((group, _), _)| format!("{:?}", group))
                        .unwrap_or_default();
                    return Err(PlanError::Cycle(stuck));
                }
            }
        }

        Ok(Self { order })
    }

    pub fn build_order(&self) -> &[G] {
        &self.order
    }

    pub fn teardown_order(&self) -> impl Iterator<Item = G> + '_ {
        self.order.iter().rev().copied()
    }

    /// Build every group in dependency order.
    ///
    /// On failure the groups built so far are destroyed again, newest first,
    /// so the set never stays half built.
    pub fn build_all<S>(&self, set: &mut S) -> anyhow::Result<()>
    where
        S: GroupSet<Group = G>,
    {
        for (built, &group) in self.order.iter().enumerate() {
            if let Err(e) = set.build(group) {
                log::error!("Building {:?} failed, unwinding {} groups", group, built);
                for &done in self.order[..built].iter().rev() {
                    set.destroy(done);
                }
                return Err(e.context(format!("failed to build {:?}", group)));
            }
        }
        Ok(())
    }

    pub fn destroy_all<S>(&self, set: &mut S)
    where
        S: GroupSet<Group = G>,
    {
        for group in self.teardown_order() {
            set.destroy(group);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum G {
        Swapchain,
        Views,
        Pass,
        Layout,
        Pipeline,
        Depth,
        Framebuffers,
        Commands,
    }

    fn viewer_plan() -> RebuildPlan<G> {
        RebuildPlan::new(&[
            (G::Swapchain, &[]),
            (G::Views, &[G::Swapchain]),
            (G::Pass, &[G::Swapchain]),
            (G::Layout, &[]),
            (G::Pipeline, &[G::Pass, G::Layout]),
            (G::Depth, &[G::Swapchain]),
            (G::Framebuffers, &[G::Views, G::Depth, G::Pass]),
            (G::Commands, &[G::Framebuffers, G::Pipeline]),
        ])
        .unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        log: Vec<(&'static str, G)>,
        fail_on: Option<G>,
    }

    impl GroupSet for Recorder {
        type Group = G;

        fn build(&mut self, group: G) -> anyhow::Result<()> {
            if self.fail_on == Some(group) {
                anyhow::bail!("no memory for {:?}", group);
            }
            self.log.push(("build", group));
            Ok(())
        }

        fn destroy(&mut self, group: G) {
            self.log.push(("destroy", group));
        }
    }

    #[test]
    fn declaration_order_is_kept_when_valid() {
        let plan = viewer_plan();
        assert_eq!(
            plan.build_order(),
            &[
                G::Swapchain,
                G::Views,
                G::Pass,
                G::Layout,
                G::Pipeline,
                G::Depth,
                G::Framebuffers,
                G::Commands
            ]
        );
    }

    #[test]
    fn dependencies_are_built_first_regardless_of_declaration() {
        let plan = RebuildPlan::new(&[
            (G::Commands, &[G::Framebuffers]),
            (G::Framebuffers, &[G::Views]),
            (G::Views, &[G::Swapchain]),
            (G::Swapchain, &[]),
        ])
        .unwrap();
        assert_eq!(
            plan.build_order(),
            &[G::Swapchain, G::Views, G::Framebuffers, G::Commands]
        );
    }

    #[test]
    fn teardown_is_reverse_of_build() {
        let plan = viewer_plan();
        let teardown: Vec<_> = plan.teardown_order().collect();
        let mut expected = plan.build_order().to_vec();
        expected.reverse();
        assert_eq!(teardown, expected);

        // Every dependent is released before what it depends on
        let pos = |g| teardown.iter().position(|&x| x == g).unwrap();
        assert!(pos(G::Framebuffers) < pos(G::Views));
        assert!(pos(G::Commands) < pos(G::Pipeline));
        assert!(pos(G::Pipeline) < pos(G::Layout));
        assert!(pos(G::Depth) < pos(G::Swapchain));
    }

    #[test]
    fn failed_build_unwinds_what_was_built() {
        let plan = viewer_plan();
        let mut set = Recorder {
            fail_on: Some(G::Depth),
            ..Default::default()
        };

        let err = plan.build_all(&mut set).unwrap_err();
        assert!(format!("{:#}", err).contains("Depth"));
        assert_eq!(
            set.log,
            vec![
                ("build", G::Swapchain),
                ("build", G::Views),
                ("build", G::Pass),
                ("build", G::Layout),
                ("build", G::Pipeline),
                ("destroy", G::Pipeline),
                ("destroy", G::Layout),
                ("destroy", G::Pass),
                ("destroy", G::Views),
                ("destroy", G::Swapchain),
            ]
        );
    }

    #[test]
    fn destroy_all_walks_every_group() {
        let plan = viewer_plan();
        let mut set = Recorder::default();
        plan.destroy_all(&mut set);
        assert_eq!(set.log.len(), 8);
        assert_eq!(set.log[0], ("destroy", G::Commands));
        assert_eq!(set.log[7], ("destroy", G::Swapchain));
    }

    #[test]
    fn invalid_declarations_are_rejected() {
        assert_eq!(
            RebuildPlan::new(&[(G::Views, &[G::Swapchain])]).unwrap_err(),
            PlanError::UnknownDependency {
                group: "Views".into(),
                dependency: "Swapchain".into()
            }
        );
        assert_eq!(
            RebuildPlan::new(&[(G::Views, &[]), (G::Views, &[])]).unwrap_err(),
            PlanError::Duplicate("Views".into())
        );
        assert_eq!(
            RebuildPlan::new(&[(G::Views, &[G::Pass]), (G::Pass, &[G::Views])]).unwrap_err(),
            PlanError::Cycle("Views".into())
        );
    }
}
