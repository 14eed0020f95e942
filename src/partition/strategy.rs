//! The balancing engine.
//!
//! `SimpleAssignmentStrategy` balances the partition distribution on the
//! number of primary and backup partitions owned, while aiming for the
//! strongest failure-domain safety the membership topology can support. It
//! runs as an iterative local search: cheap targeted passes first (leaving
//! members, orphans, primary balance, endangered backups), then a bounded
//! strong/balance iteration with an escape valve that perturbs the
//! distribution when progress stalls and, as a last resort, weakens the
//! safety target by one level.
//!
//! The engine only ever mutates its own working snapshot; the outcome of a
//! pass is a batch of advisory suggestions pushed through the
//! [`DistributionManager`](super::DistributionManager).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use super::config::StrategyConfig;
use super::context::AnalysisContext;
use super::member::{MemberId, MemberInfo, UNOWNED};
use super::ownership::Ownership;
use super::partition_set::PartitionSet;
use super::report::CompositeStats;
use super::strength::BackupStrength;
use super::traits::{DistributionManager, PartitionAssignmentStrategy};

/// A candidate transfer target with its ranking keys, sampled from the
/// analysis context at sort time.
#[derive(Clone)]
struct Candidate {
    member: Arc<MemberInfo>,
    /// Squared-distance strength score against the reference ownership.
    distance: u32,
    /// Primary or backup load, per the pass being run.
    load: u32,
}

/// Sample ranking keys for every listed member against the reference
/// ownership.
fn collect_candidates(
    ctx: &mut AnalysisContext,
    members: &[Arc<MemberInfo>],
    owners: &Ownership,
    primary: bool,
) -> Vec<Candidate> {
    members
        .iter()
        .map(|member| Candidate {
            distance: ctx.strength_distance(member, owners),
            load: ctx.member_load(member.id, primary),
            member: member.clone(),
        })
        .collect()
}

/// Strongest first, then lightest, then member id as the strict tie-break.
fn sort_strength_then_load(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.distance
            .cmp(&a.distance)
            .then(a.load.cmp(&b.load))
            .then(a.member.id.cmp(&b.member.id))
    });
}

/// Lightest first, then strongest, then member id as the strict tie-break.
fn sort_load_then_strength(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        a.load
            .cmp(&b.load)
            .then(b.distance.cmp(&a.distance))
            .then(a.member.id.cmp(&b.member.id))
    });
}

/// A [`PartitionAssignmentStrategy`] balancing on owned-partition counts with
/// failure-domain awareness.
pub struct SimpleAssignmentStrategy {
    pub(crate) config: StrategyConfig,
    pub(crate) manager: Option<Arc<dyn DistributionManager>>,

    /// The previous analysis context, kept to detect enacted advice and to
    /// carry transient hints.
    pub(crate) last_ctx: Option<AnalysisContext>,
    /// The ownership member ids when analysis was last considered.
    pub(crate) last_members: Option<HashSet<MemberId>>,
    /// The last suggested distribution, grouped by resulting ownership.
    pub(crate) last_suggestions: HashMap<Ownership, PartitionSet>,

    /// Whether the trivial two-server distribution is still in effect; turns
    /// off permanently once the topology outgrows it.
    trivial_active: bool,

    /// Composite storage statistics cache for the reporting surface.
    pub(crate) composite: Option<CompositeStats>,
    pub(crate) stats_dirty: bool,

    loss_handler: Option<Box<dyn FnMut(&PartitionSet) + Send>>,
}

impl SimpleAssignmentStrategy {
    /// Construct with the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configuration fails validation.
    pub fn new(config: StrategyConfig) -> Self {
        config.validate().expect("invalid strategy configuration");
        let trivial_active = config.trivial_two_server;
        SimpleAssignmentStrategy {
            config,
            manager: None,
            last_ctx: None,
            last_members: None,
            last_suggestions: HashMap::new(),
            trivial_active,
            composite: None,
            stats_dirty: false,
            loss_handler: None,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Register a handler invoked once per orphan analysis that loses
    /// partitions (partitions recovered with no eligible owner).
    pub fn on_partition_loss(&mut self, handler: impl FnMut(&PartitionSet) + Send + 'static) {
        self.loss_handler = Some(Box::new(handler));
    }

    /// The previous analysis context, if any pass has run.
    pub(crate) fn last_context(&self) -> Option<&AnalysisContext> {
        self.last_ctx.as_ref()
    }

    pub(crate) fn manager(&self) -> &Arc<dyn DistributionManager> {
        self.manager
            .as_ref()
            .expect("strategy used before init(manager)")
    }

    fn new_context(&self) -> AnalysisContext {
        AnalysisContext::new(self.manager().clone())
    }

    // ----- delay state machine --------------------------------------------

    /// Decide whether the analysis should run now or be delayed.
    ///
    /// In order: an explicit delay override is consumed and returned once;
    /// with unchanged membership and all prior advice enacted the analysis
    /// runs immediately; with advice still pending the delay is bounded by
    /// the suggestion-completion window (aggressively capped after a
    /// membership change); join-only churn waits out the settle delay; any
    /// departure analyzes immediately.
    fn calculate_analysis_delay(&mut self, ctx: &mut AnalysisContext) -> Duration {
        let Some(last) = self.last_ctx.as_ref() else {
            return Duration::ZERO;
        };

        if let Some(delay) = ctx.take_delay_override() {
            return delay;
        }

        let current_ids = ctx.member_ids();
        let previous_ids = self.last_members.clone().unwrap_or_default();

        if current_ids == previous_ids {
            // no membership change; check whether prior advice was enacted
            let (Some(updated), true) = (last.updated_partitions(), last.leaving().is_empty())
            else {
                // nothing was suggested, or members were leaving: re-run to
                // reach balance as soon as possible
                return Duration::ZERO;
            };

            let mut pending = updated.clone();
            if let Some(ignored) = self.manager().ignored_advice() {
                // advice the service dropped is not worth waiting for
                pending.remove_all(&ignored);
            }

            let last_ids = last.member_ids();
            let completed_at = last.completed_at();
            let completion =
                self.config
                    .suggestion_completion_delay(ctx.service().partition_count);

            for pid in pending.iter() {
                let suggested = self
                    .last_ctx
                    .as_ref()
                    .and_then(|c| c.ownership_cached(pid).cloned());
                let Some(suggested) = suggested else { continue };

                if *ctx.ownership(pid) != suggested {
                    // suggestions are still in flight; analyzing now against
                    // the intermediate state would yield conflicting advice
                    let deadline = completed_at
                        .map(|at| at + completion)
                        .unwrap_or_else(Instant::now);
                    let remaining = deadline.saturating_duration_since(Instant::now());

                    return if current_ids == last_ids {
                        remaining.min(self.config.suggestion_delay)
                    } else {
                        // membership changed since that analysis ran;
                        // reschedule aggressively
                        remaining.min(Duration::from_millis(1000))
                    };
                }
            }

            Duration::ZERO
        } else if current_ids.is_superset(&previous_ids) {
            // members only joined; let the membership settle
            self.config.member_join_delay
        } else {
            // members left; react immediately to the endangered partitions
            Duration::ZERO
        }
    }

    // ----- analysis entry points ------------------------------------------

    fn run_analysis(&mut self, ctx: &mut AnalysisContext) -> Duration {
        self.prime_distribution(ctx);

        let delay = self.analyze(ctx);

        self.last_suggestions = ctx.suggest_distribution();
        ctx.set_completed_at(Instant::now());
        delay
    }

    /// Limit backup fan-out on the very first distribution.
    ///
    /// When several members join before the initial distribution (the
    /// coordinator still owning everything, no backups), running the
    /// analysis directly scatters each member's backups across many peers.
    /// Running it first as if only the coordinator and one strong peer
    /// existed, then again with the real membership, keeps the backup
    /// fan-out low.
    fn prime_distribution(&mut self, ctx: &mut AnalysisContext) {
        let coordinator_id = ctx.service().local_member;

        if !ctx.is_initial_distribution(coordinator_id) {
            return;
        }
        if ctx.members().len() <= 2 || ctx.actual_backup_count() != 1 {
            return;
        }

        let Some(coordinator) = ctx.member_info(coordinator_id) else {
            return;
        };

        // a strong second must exist: strength was classified over this
        // same membership
        let strong = ctx
            .members()
            .iter()
            .find(|m| m.id != coordinator_id && ctx.is_strong(&coordinator, m))
            .cloned()
            .expect("no strong peer for the coordinator");

        debug!(
            coordinator = coordinator_id,
            peer = strong.id,
            "priming the initial distribution as a two-server topology"
        );

        ctx.prime(coordinator, strong);
        self.analyze(ctx);
        ctx.initialize();
    }

    /// One full balancing pass over the working snapshot. Returns the delay
    /// to suggest before the next analysis.
    fn analyze(&mut self, ctx: &mut AnalysisContext) -> Duration {
        let mut suggest_delay = self.config.suggestion_delay;

        self.check_leaving(ctx);
        self.validate_backups(ctx);

        // the two-server topology is handled by a dedicated fast path while
        // it holds
        if self.trivial_active && self.check_simple_distribution(ctx) {
            return suggest_delay;
        }

        self.check_primary_balance(ctx);

        if ctx.actual_backup_count() > 0 {
            self.check_endangered(ctx);

            let max_iterations = self.config.max_balance_iterations;
            let mut strength_orig: Option<BackupStrength> = None;
            let mut iterations = 0u32;
            let mut variance_prev = self.variance(ctx, false);

            loop {
                // redistribute until backup strength and balance are stable
                let mut changes = self.check_backup_strong(ctx);
                changes += self.check_backup_balance(ctx);
                if changes == 0 {
                    // the distribution may still be unbalanced; rare
                    changes = self.check_backup_overloaded(ctx);
                }

                if changes == 0 {
                    break;
                }

                // make sure the loop is still progressing toward the
                // fixed-point
                let variance_cur = self.variance(ctx, false);
                let round = iterations;
                iterations += 1;

                if round > max_iterations && variance_cur >= variance_prev {
                    match strength_orig.take() {
                        None => {
                            // not monotonically converging; disturb the
                            // distribution slightly and keep going
                            strength_orig = Some(ctx.backup_strength().clone());
                            self.check_backup_overloaded(ctx);
                        }
                        Some(orig) => {
                            // still no balance point after the reshuffle;
                            // weaken the strength to prevent an infinite
                            // loop and retry soon
                            error!(
                                strength = %orig,
                                members = ctx.members().len(),
                                "failed to find a partition assignment to satisfy the \
                                 backup strength; weakening it"
                            );
                            ctx.set_backup_strength(orig.weaker());
                            suggest_delay = Duration::from_millis(1000);
                        }
                    }
                    iterations = 0;
                }

                variance_prev = variance_cur;
            }
        }

        suggest_delay
    }

    // ----- balancing passes -----------------------------------------------

    /// Transfer everything owned by leaving members: promote a backup into
    /// each vacated primary (or force-transfer to the lightest member), and
    /// endanger every vacated backup index for later repair.
    fn check_leaving(&mut self, ctx: &mut AnalysisContext) {
        let leaving = ctx.leaving().to_vec();
        if leaving.is_empty() {
            return;
        }

        let configured_backups = ctx.service().backup_count;
        let members = ctx.members().to_vec();

        for member in leaving {
            let primaries = ctx.owned_partitions_cloned(member.id, 0);

            'partition: for pid in primaries.iter() {
                let owners = ctx.ownership_cloned(pid);

                // promote the highest-index backup owner, if any
                for store in (1..=configured_backups).rev() {
                    let backup_owner = owners.owner(store);
                    if backup_owner != UNOWNED {
                        ctx.transition_partition(pid, 0, Some(member.id), Some(backup_owner));
                        ctx.transition_partition(pid, store, Some(backup_owner), None);
                        continue 'partition;
                    }
                }

                // the partition had zero backups; force the transfer to the
                // most lightly loaded member
                let mut targets: Vec<(u32, MemberId)> = members
                    .iter()
                    .map(|m| (ctx.member_load(m.id, true), m.id))
                    .collect();
                targets.sort();
                let (_, lightest) = *targets
                    .first()
                    .expect("no ownership members remain to absorb a leaving member");
                ctx.transition_partition(pid, 0, Some(member.id), Some(lightest));
            }

            // endanger every backup index the leaving member held; the
            // endangered pass repairs them
            for store in 1..=configured_backups {
                let parts = ctx.owned_partitions_cloned(member.id, store);
                for pid in parts.iter() {
                    ctx.transition_partition(pid, store, Some(member.id), None);
                }
            }
        }
    }

    /// Compact backup storage indices when the membership can no longer
    /// sustain the configured backup count.
    fn validate_backups(&mut self, ctx: &mut AnalysisContext) {
        let configured = ctx.service().backup_count;
        let actual = ctx.actual_backup_count();
        if configured == actual {
            return;
        }

        let partition_count = ctx.service().partition_count;
        for pid in 0..partition_count {
            let mut valid = 1;
            for store in 1..=configured {
                let owner = ctx.ownership(pid).owner(store);
                if owner != UNOWNED {
                    if store > valid {
                        // shift this backup down to close the gap
                        ctx.transition_partition(pid, valid, None, Some(owner));
                        ctx.transition_partition(pid, store, Some(owner), None);
                    }
                    valid += 1;
                }
            }
        }
    }

    /// The two-server fast path: all primaries on the senior member, all
    /// backups on the other. Returns true while that layout is in effect.
    fn check_simple_distribution(&mut self, ctx: &mut AnalysisContext) -> bool {
        if self.manager().ownership_members().len() > 2 || ctx.service().backup_count == 0 {
            // outgrown (or never eligible); turn off for good
            self.trivial_active = false;
            return false;
        }

        if !ctx.leaving().is_empty() || ctx.members().len() == 1 {
            // defer to the standard algorithm, but allow to come back
            return false;
        }

        let senior_id = ctx.service().senior_member;
        let Some(other) = ctx
            .members()
            .iter()
            .find(|m| m.id != senior_id)
            .cloned()
        else {
            return false;
        };

        if !ctx.owned_partitions(other.id, 0).is_empty() {
            // the junior member holds primaries; this topology is not ours
            self.trivial_active = false;
            return false;
        }

        let backups = ctx.owned_partitions_cloned(other.id, 1);
        if !backups.is_full() {
            let mut missing = backups;
            missing.invert();
            for pid in missing.iter() {
                ctx.transition_partition(pid, 1, Some(senior_id), Some(other.id));
            }
        }

        true
    }

    /// Repeatedly move primaries off overloaded members, preferring
    /// orphan-recovered, then endangered, then weak partitions, until no
    /// transfer improves the balance.
    fn check_primary_balance(&mut self, ctx: &mut AnalysisContext) {
        let members = ctx.members().to_vec();
        let fair = ctx.fair_share(true);

        loop {
            let mut changes = 0;

            // overloaded members, heaviest first
            let mut overloaded: Vec<(u32, Arc<MemberInfo>)> = members
                .iter()
                .filter_map(|m| {
                    let load = ctx.member_load(m.id, true);
                    (load >= fair).then(|| (load, m.clone()))
                })
                .collect();
            overloaded.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.id.cmp(&b.1.id)));

            for (_, from) in overloaded {
                let mut remaining = ctx.owned_partitions_cloned(from.id, 0);

                // orphan-recovered partitions move cheapest, then endangered,
                // then weak, then anything
                let orphaned = ctx.collect_orphaned(&remaining);
                remaining.remove_all(&orphaned);
                changes += self.balance_primary(ctx, &from, &orphaned, &members);

                let endangered = ctx.collect_endangered(&remaining);
                remaining.remove_all(&endangered);
                changes += self.balance_primary(ctx, &from, &endangered, &members);

                let weak = ctx.collect_weak(&remaining);
                remaining.remove_all(&weak);
                changes += self.balance_primary(ctx, &from, &weak, &members);

                changes += self.balance_primary(ctx, &from, &remaining, &members);
            }

            if changes == 0 {
                break;
            }
        }
    }

    /// Move primaries in `parts` from an overloaded member to underloaded
    /// members, strongest-first, while each transfer still improves the
    /// balance.
    fn balance_primary(
        &mut self,
        ctx: &mut AnalysisContext,
        from: &MemberInfo,
        parts: &PartitionSet,
        targets: &[Arc<MemberInfo>],
    ) -> u32 {
        let fair = ctx.fair_share(true);
        let mut load_from = ctx.member_load(from.id, true);
        let mut changes = 0;

        for pid in parts.iter() {
            if load_from < fair {
                break;
            }

            let load = ctx.partition_load(pid, true);
            let mut owners = ctx.ownership_cloned(pid);
            // evaluate replacements against the vacated primary slot
            owners.set_owner(0, UNOWNED);

            let mut candidates = collect_candidates(ctx, targets, &owners, true);
            candidates.retain(|c| c.load < fair);
            sort_strength_then_load(&mut candidates);

            for candidate in &candidates {
                // only if it balances load
                if candidate.load + load < load_from {
                    ctx.transition_partition(pid, 0, Some(from.id), Some(candidate.member.id));
                    load_from -= load;
                    changes += 1;
                    break;
                }
            }
        }

        changes
    }

    /// Fill every unowned backup storage index with the strongest safe,
    /// least-loaded member.
    fn check_endangered(&mut self, ctx: &mut AnalysisContext) {
        let backups = ctx.actual_backup_count();
        let partition_count = ctx.service().partition_count;
        let members = ctx.members().to_vec();

        for pid in 0..partition_count {
            let primary = ctx.ownership(pid).primary();
            assert!(
                ctx.member_info(primary).is_some(),
                "partition {pid} is orphaned during the endangered pass"
            );

            for store in 1..=backups {
                let owners = ctx.ownership_cloned(pid);
                if owners.owner(store) != UNOWNED {
                    continue;
                }

                let mut candidates = collect_candidates(ctx, &members, &owners, false);
                candidates.retain(|c| !owners.is_owned_by(c.member.id));
                sort_strength_then_load(&mut candidates);

                let target = candidates.first().unwrap_or_else(|| {
                    panic!(
                        "failed to find a member to receive backup({store}) transfer \
                         of endangered partition {pid}, {owners}"
                    )
                });

                ctx.transition_partition(pid, store, None, Some(target.member.id));
            }
        }
    }

    /// Move backups of weak partitions to members that restore pairwise
    /// strength. Returns the number of transfers made.
    fn check_backup_strong(&mut self, ctx: &mut AnalysisContext) -> u32 {
        let backups = ctx.actual_backup_count();
        let partition_count = ctx.service().partition_count;
        let members = ctx.members().to_vec();
        let mut changes = 0;

        for pid in 0..partition_count {
            for store in 1..=backups {
                if ctx.is_partition_strong(pid) {
                    break;
                }

                let mut owners = ctx.ownership_cloned(pid);
                let from = owners.owner(store);
                // evaluate replacements against the vacated backup slot
                owners.set_owner(store, UNOWNED);

                let fair = ctx.fair_share(false);
                let all = collect_candidates(ctx, &members, &owners, false);

                // pre-filter for candidates that make the partition fully
                // safe after a single transfer
                let mut eligible: Vec<Candidate> = all
                    .iter()
                    .filter(|c| ctx.is_safe_candidate(&owners, store, &c.member))
                    .cloned()
                    .collect();
                if eligible.is_empty() {
                    // no single transfer yields full safety (e.g. every
                    // owner shares one machine); fall back to any member
                    eligible = all;
                }

                // first pass: the strongest safe, underloaded member
                let mut underloaded: Vec<Candidate> = eligible
                    .iter()
                    .filter(|c| c.load < fair && !owners.is_owned_by(c.member.id))
                    .cloned()
                    .collect();
                sort_strength_then_load(&mut underloaded);

                if let Some(target) = underloaded.first() {
                    let from = (from != UNOWNED).then_some(from);
                    ctx.transition_partition(pid, store, from, Some(target.member.id));
                    changes += 1;
                    continue;
                }

                // second pass: the least overloaded safe member
                let mut overloaded: Vec<Candidate> = eligible
                    .into_iter()
                    .filter(|c| c.load >= fair && !owners.is_owned_by(c.member.id))
                    .collect();
                sort_load_then_strength(&mut overloaded);

                if let Some(target) = overloaded.first() {
                    let from = (from != UNOWNED).then_some(from);
                    ctx.transition_partition(pid, store, from, Some(target.member.id));
                    changes += 1;
                }
            }
        }

        changes
    }

    /// Move backups off overloaded members to safe underloaded members while
    /// each transfer improves the balance. Returns the number of transfers.
    fn check_backup_balance(&mut self, ctx: &mut AnalysisContext) -> u32 {
        let backups = ctx.actual_backup_count();
        let members = ctx.members().to_vec();
        let fair = ctx.fair_share(false);
        let mut changes = 0;

        // overloaded members, heaviest backup load first
        let mut overloaded: Vec<(u32, Arc<MemberInfo>)> = members
            .iter()
            .filter_map(|m| {
                let load = ctx.member_load(m.id, false);
                (load >= fair).then(|| (load, m.clone()))
            })
            .collect();
        overloaded.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.id.cmp(&b.1.id)));

        'member: for (_, from) in overloaded {
            let mut load_from = ctx.member_load(from.id, false);

            for store in 1..=backups {
                let parts = ctx.owned_partitions_cloned(from.id, store);
                for pid in parts.iter() {
                    let load = ctx.partition_load(pid, false);
                    let mut owners = ctx.ownership_cloned(pid);
                    owners.set_owner(store, UNOWNED);

                    // safe, underloaded members ordered by load
                    let mut candidates = collect_candidates(ctx, &members, &owners, false);
                    candidates.retain(|c| {
                        c.load < fair
                            && !owners.is_owned_by(c.member.id)
                            && ctx.is_safe_candidate(&owners, store, &c.member)
                    });
                    sort_load_then_strength(&mut candidates);

                    for candidate in &candidates {
                        // only if it balances load
                        if candidate.load + load < load_from {
                            ctx.transition_partition(
                                pid,
                                store,
                                Some(from.id),
                                Some(candidate.member.id),
                            );
                            load_from -= load;
                            changes += 1;
                            break;
                        }
                    }

                    if load_from < fair {
                        continue 'member;
                    }
                }
            }
        }

        changes
    }

    /// Escape valve for a stalled balance iteration: push one backup off the
    /// first overloaded member onto any strong peer, deliberately disturbing
    /// the distribution. Returns the overload amount found, so a nonzero
    /// result keeps the caller iterating.
    fn check_backup_overloaded(&mut self, ctx: &mut AnalysisContext) -> u32 {
        let mut members = ctx.members().to_vec();
        fastrand::shuffle(&mut members);

        let fair = ctx.fair_share(false);
        let configured_backups = ctx.service().backup_count;

        let mut overload = 0u32;
        let mut from: Option<Arc<MemberInfo>> = None;
        for member in &members {
            let load = ctx.member_load(member.id, false);
            if load > fair {
                overload = load - fair;
                from = Some(member.clone());
                break;
            }
        }

        let Some(from) = from else {
            return 0;
        };

        'target: for target in &members {
            if target.id == from.id || !ctx.is_strong(&from, target) {
                continue;
            }

            for store in 1..=configured_backups {
                let parts = ctx.owned_partitions_cloned(from.id, store);
                for pid in parts.iter() {
                    if !ctx.ownership(pid).is_owned_by(target.id) {
                        ctx.transition_partition(pid, store, Some(from.id), Some(target.id));
                        break 'target;
                    }
                }
            }
        }

        overload
    }

    /// The spread between the heaviest and lightest member load.
    fn variance(&mut self, ctx: &mut AnalysisContext, primary: bool) -> u32 {
        let members = ctx.members().to_vec();
        let loads: Vec<u32> = members
            .iter()
            .map(|m| ctx.member_load(m.id, primary))
            .collect();

        match (loads.iter().max(), loads.iter().min()) {
            (Some(max), Some(min)) => max - min,
            _ => 0,
        }
    }

    fn emit_loss_notification(&mut self, lost: &PartitionSet) {
        error!(
            partitions = lost.cardinality(),
            lost = %lost,
            "partitions have been lost"
        );
        if let Some(handler) = self.loss_handler.as_mut() {
            handler(lost);
        }
    }
}

impl PartitionAssignmentStrategy for SimpleAssignmentStrategy {
    fn init(&mut self, manager: Arc<dyn DistributionManager>) {
        let service = manager.service_info();
        info!(
            service = %service.name,
            partitions = service.partition_count,
            backups = service.backup_count,
            "initializing assignment strategy"
        );
        self.manager = Some(manager);
    }

    fn analyze_orphans(&mut self, constraints: &HashMap<MemberId, PartitionSet>) {
        let mut ctx = self.new_context();
        let partition_count = ctx.service().partition_count;
        let members = ctx.members().to_vec();
        let mut lost = PartitionSet::new(partition_count);

        for pid in 0..partition_count {
            let owners = ctx.ownership_cloned(pid);
            if owners.primary() != UNOWNED {
                continue;
            }

            // rank recovery candidates by strength against the surviving
            // owners, then load, then id for determinism
            let mut candidates = collect_candidates(&mut ctx, &members, &owners, true);
            let mut eligible: Vec<Candidate> = candidates
                .iter()
                .filter(|c| {
                    constraints
                        .get(&c.member.id)
                        .is_some_and(|parts| parts.contains(pid))
                })
                .cloned()
                .collect();

            if eligible.is_empty() {
                // nothing to recover from; simply balance the assignment
                lost.add(pid);
                eligible = std::mem::take(&mut candidates);
            }

            sort_strength_then_load(&mut eligible);
            if let Some(target) = eligible.first() {
                ctx.transition_partition(pid, 0, None, Some(target.member.id));
            }
        }

        self.last_suggestions = ctx.suggest_distribution();

        if !lost.is_empty() {
            self.emit_loss_notification(&lost);

            // remember the recovered orphans so the balancing pass can move
            // them first, minimizing transfer cost
            ctx.set_orphaned_partitions(lost);
        }

        // ownership almost certainly needs rebalancing after a recovery;
        // analyze immediately
        ctx.set_delay_override(Duration::ZERO);
        self.manager().schedule_next_analysis(Duration::ZERO);
        self.last_ctx = Some(ctx);
    }

    fn analyze_distribution(&mut self) -> Option<Duration> {
        let mut ctx = self.new_context();
        ctx.copy_transients(self.last_ctx.as_ref());

        let delay = self.calculate_analysis_delay(&mut ctx);
        let result = if delay.is_zero() {
            let next = self.run_analysis(&mut ctx);
            ctx.reset_transients();
            next
        } else {
            debug!(delay_ms = delay.as_millis() as u64, "delaying analysis");
            delay
        };

        self.last_members = Some(ctx.member_ids());
        self.last_ctx = Some(ctx);
        self.stats_dirty = true;

        Some(result)
    }

    fn description(&self) -> String {
        match self.last_context() {
            Some(ctx) => format!(
                "Fair-Share={}(primary) {}(backup), Target Backup-Strength={}",
                ctx.fair_share(true),
                ctx.fair_share(false),
                ctx.backup_strength().level()
            ),
            None => String::new(),
        }
    }
}

impl std::fmt::Debug for SimpleAssignmentStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimpleAssignmentStrategy{{{}}}", self.description())
    }
}
