//! Sections d'un dessin : table des calques, blocs et flux d'entités

use std::collections::BTreeMap;

use geo::Coord;
use tracing::debug;

use super::entities::Entity;
use super::tokenizer::{records, Pair};

/// Calque déclaré dans la section TABLES
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub name: String,
    /// Couleur ACI (négative si le calque est éteint)
    pub color: Option<i64>,
    pub frozen: bool,
}

impl Layer {
    pub fn is_visible(&self) -> bool {
        !self.frozen && self.color.map_or(true, |c| c >= 0)
    }
}

/// Définition de bloc
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub name: String,
    /// Point de base (origine locale du bloc)
    pub base: Coord,
    pub entities: Vec<Entity>,
}

/// Contenu utile d'un DXF
#[derive(Debug, Clone, Default)]
pub struct Drawing {
    pub layers: Vec<Layer>,
    /// Blocs indexés par nom en majuscules
    pub blocks: BTreeMap<String, Block>,
    pub entities: Vec<Entity>,
}

impl Drawing {
    /// Lit les sections TABLES, BLOCKS et ENTITIES
    pub fn read(pairs: &[Pair]) -> Self {
        let mut drawing = Drawing::default();
        let mut current: Option<String> = None;
        let mut body: Vec<&[Pair]> = Vec::new();

        for record in records(pairs) {
            let head = record[0];
            if head.is(0, "SECTION") {
                current = record.iter().find(|p| p.code == 2).map(|p| p.value.to_ascii_uppercase());
                body.clear();
            } else if head.is(0, "ENDSEC") {
                match current.as_deref() {
                    Some("TABLES") => drawing.layers = read_layers(&body),
                    Some("BLOCKS") => drawing.blocks = read_blocks(&body),
                    Some("ENTITIES") => drawing.entities = assemble(&body),
                    _ => {}
                }
                current = None;
                body.clear();
            } else if current.is_some() {
                body.push(record);
            }
        }
        // Section ENTITIES non terminée (fichier tronqué)
        if current.as_deref() == Some("ENTITIES") && drawing.entities.is_empty() {
            drawing.entities = assemble(&body);
        }

        debug!(
            layers = drawing.layers.len(),
            blocks = drawing.blocks.len(),
            entities = drawing.entities.len(),
            "DXF sections read"
        );
        drawing
    }

    /// Noms de calques : table d'abord, puis ceux utilisés sans déclaration
    pub fn layer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.layers.iter().map(|l| l.name.clone()).collect();
        for entity in &self.entities {
            if !names.contains(&entity.layer) {
                names.push(entity.layer.clone());
            }
        }
        names
    }

    pub fn block(&self, name: &str) -> Option<&Block> {
        self.blocks.get(&name.to_ascii_uppercase())
    }
}

fn read_layers(body: &[&[Pair]]) -> Vec<Layer> {
    body.iter()
        .filter(|record| record[0].is(0, "LAYER"))
        .filter_map(|record| {
            let name = record.iter().find(|p| p.code == 2)?.value.to_string();
            let color = record.iter().find(|p| p.code == 62).and_then(Pair::int);
            let flags = record.iter().find(|p| p.code == 70).and_then(Pair::int).unwrap_or(0);
            Some(Layer {
                name,
                color,
                frozen: flags & 1 == 1,
            })
        })
        .collect()
}

fn read_blocks(body: &[&[Pair]]) -> BTreeMap<String, Block> {
    let mut blocks = BTreeMap::new();
    let mut i = 0;
    while i < body.len() {
        let record = body[i];
        if !record[0].is(0, "BLOCK") {
            i += 1;
            continue;
        }
        let name = record
            .iter()
            .find(|p| p.code == 2)
            .map(|p| p.value.to_string())
            .unwrap_or_default();
        let base = Coord {
            x: record.iter().find(|p| p.code == 10).map_or(0.0, Pair::float),
            y: record.iter().find(|p| p.code == 20).map_or(0.0, Pair::float),
        };

        let end = body[i + 1..]
            .iter()
            .position(|r| r[0].is(0, "ENDBLK"))
            .map_or(body.len(), |offset| i + 1 + offset);
        let entities = assemble(&body[i + 1..end]);
        blocks.insert(name.to_ascii_uppercase(), Block { name, base, entities });
        i = end + 1;
    }
    blocks
}

/// Regroupe les enregistrements en entités (POLYLINE + VERTEX..., INSERT + ATTRIB...)
fn assemble(body: &[&[Pair]]) -> Vec<Entity> {
    let mut entities: Vec<Entity> = Vec::new();
    let mut open_sequence = false;

    for record in body {
        let head = record[0];
        if head.is(0, "SEQEND") {
            open_sequence = false;
            continue;
        }
        if open_sequence && (head.is(0, "VERTEX") || head.is(0, "ATTRIB")) {
            if let Some(parent) = entities.last_mut() {
                parent.attach(record);
            }
            continue;
        }
        let entity = Entity::from_record(record);
        open_sequence = entity.expects_children(record);
        entities.push(entity);
    }
    entities
}
