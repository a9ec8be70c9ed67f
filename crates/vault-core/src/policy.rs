use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::grant::Grant;
use crate::types::AccountId;

/// Which principals may trigger a withdrawal. Funds always go to the grant's
/// beneficiary regardless of who triggers the release.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawPolicy {
    /// Only the registry owner.
    #[default]
    Owner,
    /// Only the grant's beneficiary.
    Beneficiary,
    /// The registry owner or the grant's beneficiary.
    OwnerOrBeneficiary,
    /// The grant's donor or its beneficiary.
    DonorOrBeneficiary,
    /// Any caller; the time gate is the only condition.
    Anyone,
}

impl WithdrawPolicy {
    pub fn permits(&self, caller: &AccountId, owner: &AccountId, grant: &Grant) -> bool {
        match self {
            WithdrawPolicy::Owner => caller == owner,
            WithdrawPolicy::Beneficiary => *caller == grant.beneficiary,
            WithdrawPolicy::OwnerOrBeneficiary => caller == owner || *caller == grant.beneficiary,
            WithdrawPolicy::DonorOrBeneficiary => {
                *caller == grant.donor || *caller == grant.beneficiary
            }
            WithdrawPolicy::Anyone => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawPolicy::Owner => "owner",
            WithdrawPolicy::Beneficiary => "beneficiary",
            WithdrawPolicy::OwnerOrBeneficiary => "owner_or_beneficiary",
            WithdrawPolicy::DonorOrBeneficiary => "donor_or_beneficiary",
            WithdrawPolicy::Anyone => "anyone",
        }
    }
}

impl fmt::Display for WithdrawPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WithdrawPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "owner" => Ok(WithdrawPolicy::Owner),
            "beneficiary" => Ok(WithdrawPolicy::Beneficiary),
            "owner_or_beneficiary" => Ok(WithdrawPolicy::OwnerOrBeneficiary),
            "donor_or_beneficiary" => Ok(WithdrawPolicy::DonorOrBeneficiary),
            "anyone" => Ok(WithdrawPolicy::Anyone),
            other => Err(format!("unknown withdraw policy: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GrantId;

    fn grant() -> Grant {
        Grant::new(
            GrantId(0),
            AccountId::from_label("donor"),
            AccountId::from_label("beneficiary"),
            10,
            100,
            0,
        )
    }

    #[test]
    fn policy_matrix() {
        let g = grant();
        let owner = AccountId::from_label("owner");
        let stranger = AccountId::from_label("stranger");

        let cases = [
            (WithdrawPolicy::Owner, [true, false, false, false]),
            (WithdrawPolicy::Beneficiary, [false, false, true, false]),
            (WithdrawPolicy::OwnerOrBeneficiary, [true, false, true, false]),
            (WithdrawPolicy::DonorOrBeneficiary, [false, true, true, false]),
            (WithdrawPolicy::Anyone, [true, true, true, true]),
        ];
        for (policy, expected) in cases {
            let callers = [&owner, &g.donor, &g.beneficiary, &stranger];
            for (caller, want) in callers.iter().zip(expected) {
                assert_eq!(policy.permits(caller, &owner, &g), want, "{policy} / {caller}");
            }
        }
    }

    #[test]
    fn parses_cli_spellings() {
        assert_eq!("owner-or-beneficiary".parse(), Ok(WithdrawPolicy::OwnerOrBeneficiary));
        assert_eq!("anyone".parse(), Ok(WithdrawPolicy::Anyone));
        assert!("admin".parse::<WithdrawPolicy>().is_err());
    }

    #[test]
    fn default_is_owner() {
        assert_eq!(WithdrawPolicy::default(), WithdrawPolicy::Owner);
    }
}
