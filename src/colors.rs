use ansi_term::Colour;

pub const RED: Colour = Colour::Fixed(9);
pub const YELLOW: Colour = Colour::Fixed(11);
pub const CYAN: Colour = Colour::Fixed(14);
pub const WHITE: Colour = Colour::Fixed(15);
