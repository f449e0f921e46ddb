//! Discrétisation des arcs, cercles et ellipses

use std::f64::consts::TAU;

use geo::Coord;

/// Résolution angulaire des arcs (degrés)
pub const ARC_SEGMENT_DEGREES: f64 = 10.0;

fn segments_for(sweep_radians: f64) -> usize {
    let step = ARC_SEGMENT_DEGREES.to_radians();
    // Tolérance pour que 90° donne exactement 9 segments
    ((sweep_radians.abs() / step - 1e-9).ceil() as usize).max(1)
}

/// Balayage antihoraire de `start` à `end`, dans ]0, 2π]
fn ccw_sweep(start: f64, end: f64) -> f64 {
    let sweep = (end - start).rem_euclid(TAU);
    if sweep <= f64::EPSILON {
        TAU
    } else {
        sweep
    }
}

/// Points d'un arc de cercle (angles en degrés, sens antihoraire)
pub fn arc_points(center: Coord, radius: f64, start_degrees: f64, end_degrees: f64) -> Vec<Coord> {
    let start = start_degrees.to_radians();
    let sweep = ccw_sweep(start, end_degrees.to_radians());
    let n = segments_for(sweep);
    (0..=n)
        .map(|i| {
            let angle = start + sweep * i as f64 / n as f64;
            Coord {
                x: center.x + radius * angle.cos(),
                y: center.y + radius * angle.sin(),
            }
        })
        .collect()
}

/// Anneau fermé d'un cercle
pub fn circle_ring(center: Coord, radius: f64) -> Vec<Coord> {
    let mut ring = arc_points(center, radius, 0.0, 360.0);
    // Fermeture exacte malgré les arrondis de sin/cos
    if let Some(&first) = ring.first() {
        if let Some(last) = ring.last_mut() {
            *last = first;
        }
    }
    ring
}

/// Indique si les paramètres d'une ellipse décrivent un tour complet
pub fn is_full_turn(start: f64, end: f64) -> bool {
    let sweep = (end - start).abs();
    sweep <= f64::EPSILON || (sweep - TAU).abs() < 1e-9
}

/// Points d'une ellipse
///
/// `major` est l'extrémité du grand axe relative au centre, `ratio` le
/// rapport petit axe / grand axe, `start` et `end` les paramètres (radians).
pub fn ellipse_points(center: Coord, major: Coord, ratio: f64, start: f64, end: f64) -> Vec<Coord> {
    let minor = Coord {
        x: -major.y * ratio,
        y: major.x * ratio,
    };
    let full = is_full_turn(start, end);
    let sweep = if full { TAU } else { ccw_sweep(start, end) };
    let n = segments_for(sweep);

    let mut points: Vec<Coord> = (0..=n)
        .map(|i| {
            let t = start + sweep * i as f64 / n as f64;
            Coord {
                x: center.x + major.x * t.cos() + minor.x * t.sin(),
                y: center.y + major.y * t.cos() + minor.y * t.sin(),
            }
        })
        .collect();
    if full {
        if let Some(&first) = points.first() {
            if let Some(last) = points.last_mut() {
                *last = first;
            }
        }
    }
    points
}
