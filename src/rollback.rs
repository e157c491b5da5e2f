use crate::{
    activate::{ActivationPlan, Activator},
    error::Result,
    generations::{Generation, Generations, Profile},
};

/// Picks the generation a rollback goes to.
///
/// `requested >= 0` is an absolute generation number and is taken as is; `-n` is `n`
/// generations before `current`; nothing means the one right before it. `gens` has to be
/// newest first.
pub fn resolve_target(
    gens: &Generations,
    current: Generation,
    requested: Option<i64>,
) -> Result<Generation> {
    match requested {
        Some(n) if n >= 0 => Ok(Generation::from(n.unsigned_abs())),
        Some(n) => {
            let back = usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX);
            gens.previous(current, back)
        }
        None => gens.previous(current, 1),
    }
}

/// Diffs the current generation against the target and activates the target.
pub fn rollback(profile: &Profile, requested: Option<i64>, activator: &Activator) -> Result<()> {
    let mut gens = profile.populate()?;
    gens.sort_descending();
    let current = profile.current()?;
    let target = resolve_target(&gens, current, requested)?;
    log::info!("{} -> {}", current, target);

    let current_out = profile.out_path(current)?;
    let target_out = profile.out_path(target)?;

    log::info!("Comparing changes ({} -> {})", current, target);
    activator.diff(&current_out, &target_out);

    log::info!("Switching to and activating {}", target);
    activator.activate_local(&ActivationPlan::rollback(profile, target, target_out))
}
