use nalgebra::Vector3;

use crate::config::OrientationSource;
use crate::error::ExtractError;
use crate::io::ItemRecord;

/// Converts a RELION-style (tilt, psi) pair into the spherical angles
/// (theta, phi) of the direction the particle z-axis maps to under the
/// active intrinsic ZYZ rotation: `(-sin t cos p, sin t sin p, cos t)`,
/// so theta = tilt and phi = 180 deg - psi.
pub fn find_spherical(tilt: f64, psi: f64, degree: bool) -> (f64, f64) {
    let half_turn = if degree { 180.0 } else { std::f64::consts::PI };
    (tilt, half_turn - psi)
}

/// Displacement of the given signed length along the direction (theta, phi).
pub fn project_along_line(theta: f64, phi: f64, distance: f64, degree: bool) -> Vector3<f64> {
    let (theta, phi) = if degree {
        (theta.to_radians(), phi.to_radians())
    } else {
        (theta, phi)
    };
    Vector3::new(
        distance * theta.sin() * phi.cos(),
        distance * theta.sin() * phi.sin(),
        distance * theta.cos(),
    )
}

/// The Euler triple describing the exactly opposite-facing orientation,
/// in degrees, wrapped to [0, 360).
pub fn reverse_euler(rot: f64, tilt: f64, psi: f64) -> (f64, f64, f64) {
    (
        (rot + 180.0).rem_euclid(360.0),
        (180.0 - tilt).rem_euclid(360.0),
        (psi + 180.0).rem_euclid(360.0),
    )
}

/// Reverses the orientation recorded on one item.
///
/// The prior triple (rot, tilt_prior, psi_prior) and the nominal triple
/// (rot, tilt, psi) share the rot component; when both triples are present
/// rot is reversed exactly once. When only one triple is complete, only
/// that one is reversed and the item is still accepted; this partial-
/// success policy mirrors the upstream data, where priors are frequently
/// the only angles present.
pub fn reverse_item_angles(item: &mut ItemRecord) {
    let prior_done = match (item.rot, item.tilt_prior, item.psi_prior) {
        (Some(rot), Some(tilt), Some(psi)) => {
            let (rot_r, tilt_r, psi_r) = reverse_euler(rot, tilt, psi);
            item.rot = Some(rot_r);
            item.tilt_prior = Some(tilt_r);
            item.psi_prior = Some(psi_r);
            true
        }
        _ => false,
    };

    if let (Some(rot), Some(tilt), Some(psi)) = (item.rot, item.tilt, item.psi) {
        let (rot_r, tilt_r, psi_r) = reverse_euler(rot, tilt, psi);
        if !prior_done {
            item.rot = Some(rot_r);
        }
        item.tilt = Some(tilt_r);
        item.psi = Some(psi_r);
    }
}

/// Fills `normal_theta` / `normal_phi` from the item's tilt/psi pair,
/// chosen per the caller's orientation preference. Missing angles are a
/// fatal lookup error, not a skip.
pub fn set_normal_angles(
    item: &mut ItemRecord,
    orientation: OrientationSource,
) -> Result<(), ExtractError> {
    let (pair, which) = match orientation {
        OrientationSource::Prior => ((item.tilt_prior, item.psi_prior), "prior"),
        OrientationSource::Nominal => ((item.tilt, item.psi), "nominal"),
    };
    let (tilt, psi) = match pair {
        (Some(tilt), Some(psi)) => (tilt, psi),
        _ => {
            return Err(ExtractError::MissingAngles {
                unit_id: item.unit_id.clone(),
                particle_id: item.particle_id,
                which,
            })
        }
    };
    let (theta, phi) = find_spherical(tilt, psi, true);
    item.normal_theta = Some(theta);
    item.normal_phi = Some(phi);
    Ok(())
}

/// Projects every item a fixed signed distance along its normal and stores
/// the result as the region-frame crop center. A zero or unset distance
/// yields the identity (center = nominal coordinate); that is a policy
/// choice, not a special case in the math.
pub fn project_along_normals(
    items: &mut [ItemRecord],
    distance: Option<f64>,
) -> Result<(), ExtractError> {
    match distance {
        Some(d) if d != 0.0 => {
            for item in items.iter_mut() {
                let (theta, phi) = match (item.normal_theta, item.normal_phi) {
                    (Some(t), Some(p)) => (t, p),
                    _ => {
                        return Err(ExtractError::MissingAngles {
                            unit_id: item.unit_id.clone(),
                            particle_id: item.particle_id,
                            which: "normal",
                        })
                    }
                };
                let shift = project_along_line(theta, phi, d, true);
                let center = Vector3::from(item.coord_reg) + shift;
                item.center_reg = Some([center.x, center.y, center.z]);
            }
        }
        _ => {
            for item in items.iter_mut() {
                item.center_reg = Some(item.coord_reg);
            }
        }
    }
    Ok(())
}
