use serenity::{
    all::ButtonStyle,
    builder::{CreateActionRow, CreateButton},
};

/// Custom ids for the track picker buttons
pub mod button_ids {
    pub const PICK_PREFIX: &str = "pick_";
    pub const PICK_CANCEL: &str = "pick_cancel";
}

/// Discord allows at most five buttons per row.
const BUTTONS_PER_ROW: usize = 5;

/// What a pressed picker button means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerButton {
    /// 0-based candidate index.
    Candidate(usize),
    Cancel,
}

/// Numbered buttons `1..=count`, then a cancel button on its own row.
pub fn picker_buttons(count: usize, disabled: bool) -> Vec<CreateActionRow> {
    let numbers: Vec<CreateButton> = (0..count)
        .map(|i| {
            CreateButton::new(format!("{}{}", button_ids::PICK_PREFIX, i))
                .label((i + 1).to_string())
                .style(ButtonStyle::Secondary)
                .disabled(disabled)
        })
        .collect();

    let mut rows: Vec<CreateActionRow> = numbers
        .chunks(BUTTONS_PER_ROW)
        .map(|chunk| CreateActionRow::Buttons(chunk.to_vec()))
        .collect();

    rows.push(CreateActionRow::Buttons(vec![CreateButton::new(
        button_ids::PICK_CANCEL,
    )
    .label("Cancel")
    .emoji('✖')
    .style(ButtonStyle::Danger)
    .disabled(disabled)]));

    rows
}

/// Maps a custom id back to the picker choice; `None` for foreign ids.
pub fn parse_picker_button(custom_id: &str) -> Option<PickerButton> {
    if custom_id == button_ids::PICK_CANCEL {
        return Some(PickerButton::Cancel);
    }
    custom_id
        .strip_prefix(button_ids::PICK_PREFIX)?
        .parse()
        .ok()
        .map(PickerButton::Candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ten_candidates_fill_two_rows_plus_cancel() {
        let rows = serde_json::to_value(picker_buttons(10, false)).unwrap();
        let rows = rows.as_array().unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["components"].as_array().unwrap().len(), 5);
        assert_eq!(rows[1]["components"][4]["label"], "10");
        assert_eq!(rows[2]["components"][0]["label"], "Cancel");
    }

    #[test]
    fn disabled_buttons_stay_disabled() {
        let rows = serde_json::to_value(picker_buttons(3, true)).unwrap();
        for row in rows.as_array().unwrap() {
            for button in row["components"].as_array().unwrap() {
                assert_eq!(button["disabled"], true);
            }
        }
    }

    #[test]
    fn parses_custom_ids() {
        assert_eq!(parse_picker_button("pick_0"), Some(PickerButton::Candidate(0)));
        assert_eq!(parse_picker_button("pick_9"), Some(PickerButton::Candidate(9)));
        assert_eq!(parse_picker_button("pick_cancel"), Some(PickerButton::Cancel));
        assert_eq!(parse_picker_button("player_skip"), None);
        assert_eq!(parse_picker_button("pick_x"), None);
    }
}
