use super::{Profile, Upgrade, UpgradeCatalog};

/// Picks the affordable upgrade that brings the most hourly profit per coin.
///
/// Only a strictly better efficiency replaces the current pick, so the
/// first seen upgrade wins the ties and upgrades that bring nothing are
/// never bought.
pub(crate) fn select_best_upgrade<'a>(
    catalog: &'a UpgradeCatalog,
    profile: &Profile,
) -> Option<&'a Upgrade> {
    let mut best = None;
    let mut best_efficiency = 0.0;

    for upgrade in catalog.iter().filter(|upgrade| is_eligible(upgrade, profile)) {
        let Some(price) = upgrade.next_modifier.price.filter(|&price| price > 0.0) else {
            continue;
        };

        let efficiency = upgrade.next_modifier.profit_per_hour_relative / price;

        if efficiency > best_efficiency {
            best_efficiency = efficiency;
            best = Some(upgrade);
        }
    }

    best
}

fn is_eligible(upgrade: &Upgrade, profile: &Profile) -> bool {
    if !upgrade.status.is_purchasable() {
        return false;
    }

    let modifier = &upgrade.next_modifier;

    // Unknown price means the upgrade is maxed out
    if !modifier.price.is_some_and(|price| price <= profile.balance) {
        return false;
    }

    let Some(requirements) = &modifier.requirements else {
        return true;
    };

    requirements
        .level
        .map_or(true, |level| level <= profile.level)
        && requirements
            .referrals
            .map_or(true, |referrals| referrals <= profile.referrals_count)
}
