use concord_core::{EnsembleStrategy, Micros};

/// Per-model outcome folded into an [`EnsembleReport`] (§4.5 step 8).
#[derive(Debug, Clone)]
pub struct MemberOutcome {
    pub model_alias: String,
    pub succeeded: bool,
    pub cost_micro: Micros,
    pub platform_budget: bool,
}

/// Aggregate report for a multi-model request (best_of_n / consensus /
/// fallback): requested/succeeded/failed counts, and a micros breakdown
/// across platform-funded vs. BYOK members. `requested` is the configured
/// ensemble size; for `fallback`, `outcomes` holds only the members actually
/// invoked (the gateway stops at the first success), so `requested` can
/// exceed `outcomes.len()`. `savings_micro` is what the un-invoked members
/// would have cost at the ensemble's average per-member cost — zero for
/// `best_of_n`/`consensus`, which always invoke every member.
#[derive(Debug, Clone)]
pub struct EnsembleReport {
    pub strategy: EnsembleStrategy,
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_micro: Micros,
    pub platform_micro: Micros,
    pub byok_micro: Micros,
    pub reserved_micro: Micros,
    pub savings_micro: Micros,
}

/// Fold per-member outcomes into the ensemble report. `reserved_micro` is
/// the sum of `max_cost_micro` reserved up front for platform-budget
/// members, passed in separately since members that fail before usage is
/// reported still held a reservation at call time.
pub fn aggregate(
    strategy: EnsembleStrategy,
    requested: usize,
    outcomes: &[MemberOutcome],
    reserved_micro: Micros,
) -> EnsembleReport {
    let invoked = outcomes.len();
    let succeeded = outcomes.iter().filter(|o| o.succeeded).count();
    let failed = invoked - succeeded;

    let platform_micro: Micros = outcomes
        .iter()
        .filter(|o| o.platform_budget)
        .map(|o| o.cost_micro)
        .sum();
    let byok_micro: Micros = outcomes
        .iter()
        .filter(|o| !o.platform_budget)
        .map(|o| o.cost_micro)
        .sum();
    let total_micro = platform_micro + byok_micro;

    let skipped = requested.saturating_sub(invoked);
    let savings_micro = if strategy == EnsembleStrategy::Fallback && invoked > 0 {
        (skipped as Micros) * (total_micro / invoked as Micros)
    } else {
        0
    };

    EnsembleReport {
        strategy,
        requested,
        succeeded,
        failed: failed + skipped,
        total_micro,
        platform_micro,
        byok_micro,
        reserved_micro,
        savings_micro,
    }
}
