//! Per-model vehicle capabilities

const TURRET_MODELS: [u16; 3] = [407, 432, 601];

const ADJUSTABLE_PROPERTY_MODELS: [u16; 9] = [406, 443, 486, 520, 524, 525, 530, 531, 592];

const FIRST_MODEL: u16 = 400;
const LAST_MODEL: u16 = 611;

const DOORLESS_MODELS: [u16; 14] = [
    424, 441, 457, 465, 485, 486, 501, 530, 531, 564, 568, 571, 572, 594,
];

pub fn is_valid_model(model: u16) -> bool {
    (FIRST_MODEL..=LAST_MODEL).contains(&model)
}

/// Fire trucks and tanks
pub fn has_turret(model: u16) -> bool {
    TURRET_MODELS.contains(&model)
}

/// Cranes, dozers, forklifts and the like
pub fn has_adjustable_property(model: u16) -> bool {
    ADJUSTABLE_PROPERTY_MODELS.contains(&model)
}

pub fn has_doors(model: u16) -> bool {
    is_valid_model(model) && !DOORLESS_MODELS.contains(&model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_tables() {
        assert!(has_turret(601));
        assert!(!has_turret(400));
        assert!(has_adjustable_property(525));
        assert!(!has_adjustable_property(411));
        assert!(has_doors(411));
        assert!(!has_doors(486));
        assert!(!has_doors(399));
        assert!(!has_doors(612));
    }
}
