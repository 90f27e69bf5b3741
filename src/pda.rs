use solana_sdk::pubkey::Pubkey;

pub const BATTLE_STATE_SEED: &[u8] = b"battle_state";
pub const LAUNCH_SEED: &[u8] = b"launch";
pub const BUYER_SEED: &[u8] = b"buyer";
pub const PRICE_ORACLE_SEED: &[u8] = b"price_oracle";

/// Program ids for one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramIds {
    pub battle: Pubkey,
    pub launch: Pubkey,
}

impl ProgramIds {
    pub fn battle_state(&self, mint: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[BATTLE_STATE_SEED, mint.as_ref()], &self.battle).0
    }

    pub fn launch(&self, mint: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[LAUNCH_SEED, mint.as_ref()], &self.launch).0
    }

    pub fn buyer_record(&self, launch: &Pubkey, buyer: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[BUYER_SEED, launch.as_ref(), buyer.as_ref()], &self.launch).0
    }

    /// The oracle singleton lives under the battle program.
    pub fn price_oracle(&self) -> Pubkey {
        Pubkey::find_program_address(&[PRICE_ORACLE_SEED], &self.battle).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivations_are_stable_and_distinct() {
        let ids = ProgramIds {
            battle: Pubkey::new_unique(),
            launch: Pubkey::new_unique(),
        };
        let mint = Pubkey::new_unique();
        assert_eq!(ids.battle_state(&mint), ids.battle_state(&mint));
        assert_ne!(ids.battle_state(&mint), ids.launch(&mint));

        let other = ProgramIds {
            battle: Pubkey::new_unique(),
            launch: ids.launch,
        };
        assert_ne!(ids.battle_state(&mint), other.battle_state(&mint));
        assert_eq!(ids.launch(&mint), other.launch(&mint));

        let launch = ids.launch(&mint);
        assert_ne!(
            ids.buyer_record(&launch, &Pubkey::new_unique()),
            ids.buyer_record(&launch, &Pubkey::new_unique())
        );
    }
}
